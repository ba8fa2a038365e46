//! Built-in drivers.
//!
//! Every variant recognises one project convention by the presence of marker files.
//! [`BuiltinDriver::ALL`] is the selection order: framework drivers first (Laravel last
//! among them, since several frameworks are Laravel applications), then the two
//! generic layouts.

use std::path::PathBuf;

use crate::drivers::{Driver, DriverClass, DriverError, Site};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinDriver {
    Bedrock,
    Cake,
    Concrete5,
    Contao,
    Craft,
    Drupal,
    Jigsaw,
    Joomla,
    Katana,
    Kirby,
    Magento2,
    Neos,
    Sculpin,
    StatamicV1,
    StatamicV2,
    Statamic,
    Symfony,
    Typo3,
    WordPress,
    Laravel,
    BasicWithPublic,
    Basic,
}

impl BuiltinDriver {
    /// Every built-in driver, in selection order.
    pub const ALL: [BuiltinDriver; 22] = [
        BuiltinDriver::Bedrock,
        BuiltinDriver::Cake,
        BuiltinDriver::Concrete5,
        BuiltinDriver::Contao,
        BuiltinDriver::Craft,
        BuiltinDriver::Drupal,
        BuiltinDriver::Jigsaw,
        BuiltinDriver::Joomla,
        BuiltinDriver::Katana,
        BuiltinDriver::Kirby,
        BuiltinDriver::Magento2,
        BuiltinDriver::Neos,
        BuiltinDriver::Sculpin,
        BuiltinDriver::StatamicV1,
        BuiltinDriver::StatamicV2,
        BuiltinDriver::Statamic,
        BuiltinDriver::Symfony,
        BuiltinDriver::Typo3,
        BuiltinDriver::WordPress,
        BuiltinDriver::Laravel,
        BuiltinDriver::BasicWithPublic,
        BuiltinDriver::Basic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuiltinDriver::Bedrock => "Bedrock",
            BuiltinDriver::Cake => "Cake",
            BuiltinDriver::Concrete5 => "Concrete5",
            BuiltinDriver::Contao => "Contao",
            BuiltinDriver::Craft => "Craft",
            BuiltinDriver::Drupal => "Drupal",
            BuiltinDriver::Jigsaw => "Jigsaw",
            BuiltinDriver::Joomla => "Joomla",
            BuiltinDriver::Katana => "Katana",
            BuiltinDriver::Kirby => "Kirby",
            BuiltinDriver::Magento2 => "Magento2",
            BuiltinDriver::Neos => "Neos",
            BuiltinDriver::Sculpin => "Sculpin",
            BuiltinDriver::StatamicV1 => "StatamicV1",
            BuiltinDriver::StatamicV2 => "StatamicV2",
            BuiltinDriver::Statamic => "Statamic",
            BuiltinDriver::Symfony => "Symfony",
            BuiltinDriver::Typo3 => "Typo3",
            BuiltinDriver::WordPress => "WordPress",
            BuiltinDriver::Laravel => "Laravel",
            BuiltinDriver::BasicWithPublic => "BasicWithPublic",
            BuiltinDriver::Basic => "Basic",
        }
    }

    /// Look a driver up by name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|driver| driver.as_str().eq_ignore_ascii_case(name))
    }
}

/// `<root><uri>`, then the same with `/index.html` appended.
fn static_in(site: &Site<'_>, root: &str, uri: &str) -> Result<Option<PathBuf>, DriverError> {
    let uri = uri.trim_end_matches('/');
    site.first_file([
        format!("{root}{uri}").as_str(),
        format!("{root}{uri}/index.html").as_str(),
    ])
}

/// The requested script itself, a directory index, then the site-wide index.
fn front_controller_in(
    site: &Site<'_>,
    root: &str,
    uri: &str,
) -> Result<Option<PathBuf>, DriverError> {
    let uri = uri.trim_end_matches('/');
    let candidates = [
        format!("{root}{uri}"),
        format!("{root}{uri}/index.php"),
        format!("{root}{uri}/index.html"),
        format!("{root}/index.php"),
        format!("{root}/index.html"),
    ];
    site.first_file(candidates.iter().map(String::as_str))
}

/// The first of `dirs` present in the site, if any.
fn first_dir<'d>(site: &Site<'_>, dirs: &[&'d str]) -> Result<Option<&'d str>, DriverError> {
    for dir in dirs {
        if site.is_dir(dir)? {
            return Ok(Some(*dir));
        }
    }
    Ok(None)
}

fn craft_public_dir(site: &Site<'_>) -> Result<&'static str, DriverError> {
    for dir in ["web", "public"] {
        if site.is_file(&format!("{dir}/index.php"))? {
            return Ok(dir);
        }
    }
    Ok("public")
}

fn drupal_root(site: &Site<'_>) -> Result<String, DriverError> {
    Ok(first_dir(site, &["docroot", "public", "web"])?
        .map(|dir| format!("/{dir}"))
        .unwrap_or_default())
}

fn laravel_static(site: &Site<'_>, uri: &str) -> Result<Option<PathBuf>, DriverError> {
    if let Some(rest) = uri.strip_prefix("/storage/") {
        if let Some(path) = site.file_at(&format!("storage/app/public/{rest}"))? {
            return Ok(Some(path));
        }
    }
    site.file_at(&format!("/public{uri}"))
}

impl Driver for BuiltinDriver {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn class(&self) -> DriverClass {
        match self {
            BuiltinDriver::BasicWithPublic | BuiltinDriver::Basic => DriverClass::Basic,
            _ => DriverClass::Specific,
        }
    }

    fn serves(&self, site: &Site<'_>, _uri: &str) -> Result<bool, DriverError> {
        Ok(match self {
            BuiltinDriver::Bedrock => {
                site.is_file("web/app/mu-plugins/bedrock-autoloader.php")?
                    || (site.is_dir("web/app")?
                        && site.is_file("web/wp-config.php")?
                        && site.is_file("config/application.php")?)
            }
            BuiltinDriver::Cake => site.is_file("bin/cake")?,
            BuiltinDriver::Concrete5 => site.exists("concrete/config/install/base")?,
            BuiltinDriver::Contao => site.is_dir("vendor/contao")? && site.is_file("web/app.php")?,
            BuiltinDriver::Craft => site.exists("craft")?,
            BuiltinDriver::Drupal => {
                let root = drupal_root(site)?;
                site.exists(&format!("{root}/misc/drupal.js"))?
                    || site.exists(&format!("{root}/core/lib/Drupal.php"))?
            }
            BuiltinDriver::Jigsaw => site.is_dir("build_local")?,
            BuiltinDriver::Joomla => site.is_dir("libraries/joomla")?,
            BuiltinDriver::Katana => site.exists("katana")?,
            BuiltinDriver::Kirby => site.is_dir("kirby")?,
            BuiltinDriver::Magento2 => site.is_file("bin/magento")? && site.is_file("pub/index.php")?,
            BuiltinDriver::Neos => site.is_file("flow")? && site.is_dir("Web")?,
            BuiltinDriver::Sculpin => {
                site.is_dir("output_dev")? && (site.is_dir("source")? || site.is_dir(".sculpin")?)
            }
            BuiltinDriver::StatamicV1 => site.is_file("_app/core/statamic.php")?,
            BuiltinDriver::StatamicV2 => site.is_dir("statamic")?,
            BuiltinDriver::Statamic => site.is_file("artisan")? && site.is_dir("vendor/statamic/cms")?,
            BuiltinDriver::Symfony => {
                ((site.is_file("web/app_dev.php")? || site.is_file("web/app.php")?)
                    && site.is_file("app/AppKernel.php")?)
                    || (site.is_file("public/index.php")? && site.is_file("src/Kernel.php")?)
            }
            BuiltinDriver::Typo3 => site.is_dir("web/typo3")? && site.is_file("web/typo3/index.php")?,
            BuiltinDriver::WordPress => {
                site.is_file("wp-config.php")? || site.is_file("wp-config-sample.php")?
            }
            BuiltinDriver::Laravel => site.is_file("public/index.php")? && site.is_file("artisan")?,
            BuiltinDriver::BasicWithPublic => site.is_dir("public")?,
            BuiltinDriver::Basic => true,
        })
    }

    fn mutate_uri(&self, uri: &str) -> String {
        let prefix = match self {
            BuiltinDriver::Jigsaw => "/build_local",
            BuiltinDriver::Katana => "/public",
            BuiltinDriver::Sculpin => "/output_dev",
            _ => return uri.to_string(),
        };
        format!("{prefix}{uri}").trim_end_matches('/').to_string()
    }

    fn is_static_file(&self, site: &Site<'_>, uri: &str) -> Result<Option<PathBuf>, DriverError> {
        match self {
            BuiltinDriver::Bedrock
            | BuiltinDriver::Contao
            | BuiltinDriver::Typo3 => site.file_at(&format!("/web{uri}")),
            BuiltinDriver::Cake => site.file_at(&format!("/webroot{uri}")),
            BuiltinDriver::Craft => {
                let dir = craft_public_dir(site)?;
                site.file_at(&format!("/{dir}{uri}"))
            }
            BuiltinDriver::Drupal => {
                let root = drupal_root(site)?;
                site.file_at(&format!("{root}{uri}"))
            }
            BuiltinDriver::Magento2 => site.file_at(&format!("/pub{uri}")),
            BuiltinDriver::Neos => site.file_at(&format!("/Web{uri}")),
            BuiltinDriver::Symfony => site.first_file([
                format!("/web{uri}").as_str(),
                format!("/public{uri}").as_str(),
            ]),
            BuiltinDriver::Statamic | BuiltinDriver::Laravel => laravel_static(site, uri),
            BuiltinDriver::BasicWithPublic => static_in(site, "/public", uri),
            BuiltinDriver::Concrete5
            | BuiltinDriver::Jigsaw
            | BuiltinDriver::Joomla
            | BuiltinDriver::Katana
            | BuiltinDriver::Kirby
            | BuiltinDriver::Sculpin
            | BuiltinDriver::StatamicV1
            | BuiltinDriver::StatamicV2
            | BuiltinDriver::WordPress
            | BuiltinDriver::Basic => static_in(site, "", uri),
        }
    }

    fn front_controller_path(
        &self,
        site: &Site<'_>,
        uri: &str,
    ) -> Result<Option<PathBuf>, DriverError> {
        match self {
            BuiltinDriver::Bedrock => front_controller_in(site, "/web", uri),
            BuiltinDriver::Cake => site.file_at("webroot/index.php"),
            BuiltinDriver::Concrete5 => {
                if uri.starts_with("/application/files") {
                    site.file_at(uri)
                } else {
                    site.file_at("index.php")
                }
            }
            BuiltinDriver::Contao => {
                if uri.starts_with("/app_dev.php") {
                    site.file_at("web/app_dev.php")
                } else {
                    site.file_at("web/app.php")
                }
            }
            BuiltinDriver::Craft => {
                let dir = craft_public_dir(site)?;
                site.file_at(&format!("{dir}/index.php"))
            }
            BuiltinDriver::Drupal => {
                let root = drupal_root(site)?;
                if uri.ends_with(".php") {
                    if let Some(script) = site.file_at(&format!("{root}{uri}"))? {
                        return Ok(Some(script));
                    }
                }
                site.file_at(&format!("{root}/index.php"))
            }
            BuiltinDriver::Kirby => {
                if uri.starts_with("/panel") {
                    if let Some(panel) = site.file_at("panel/index.php")? {
                        return Ok(Some(panel));
                    }
                }
                site.file_at("index.php")
            }
            BuiltinDriver::Joomla | BuiltinDriver::StatamicV1 => site.file_at("index.php"),
            BuiltinDriver::StatamicV2 => site.first_file(["index.php", "public/index.php"]),
            BuiltinDriver::Magento2 => site.file_at("pub/index.php"),
            BuiltinDriver::Neos => site.file_at("Web/index.php"),
            BuiltinDriver::Symfony => {
                site.first_file(["web/app_dev.php", "web/app.php", "public/index.php"])
            }
            BuiltinDriver::Typo3 => {
                if uri.starts_with("/typo3") {
                    if let Some(backend) = site.file_at("web/typo3/index.php")? {
                        return Ok(Some(backend));
                    }
                }
                site.file_at("web/index.php")
            }
            BuiltinDriver::Statamic => {
                let cached = format!("public/static{}_.html", uri.trim_end_matches('/'));
                if let Some(page) = site.file_at(&cached)? {
                    return Ok(Some(page));
                }
                site.file_at("public/index.php")
            }
            BuiltinDriver::Laravel => site.file_at("public/index.php"),
            BuiltinDriver::BasicWithPublic => front_controller_in(site, "/public", uri),
            BuiltinDriver::Jigsaw
            | BuiltinDriver::Katana
            | BuiltinDriver::Sculpin
            | BuiltinDriver::WordPress
            | BuiltinDriver::Basic => front_controller_in(site, "", uri),
        }
    }
}
