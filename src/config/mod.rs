use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Site-specific markers used to analyse captured traffic
    pub site: SiteConfig,

    /// Headless browser settings
    pub browser: BrowserConfig,

    /// Media processor settings
    pub media: MediaConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Root URL of the site; book URLs must live on this host
    pub base_url: String,

    /// Path prefix of the POST request that returns the book data
    pub book_data_prefix: String,

    /// Substring identifying the playlist manifest request
    pub manifest_marker: String,

    /// Part of the preview URL that selects the thumbnail variant
    pub cover_thumbnail_marker: String,

    /// Replacement for the thumbnail marker that selects the large cover
    pub cover_large_marker: String,

    /// CSS selector for the "about series" text on a book page
    pub series_selector: String,

    /// CSS selector for book links on a series listing page
    pub series_book_link_selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Chrome/Chromium executable (auto-detected if not set)
    pub chrome_executable: Option<PathBuf>,

    /// Run the browser without a window
    pub headless: bool,

    /// Time to keep listening for network traffic after the page loaded
    pub settle_ms: u64,

    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,

    /// Extra command line switches passed to the browser
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// ffmpeg executable
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Output directory used when none is given on the command line
    pub output_dir: PathBuf,

    /// User agent for cover, segment and listing requests
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site: SiteConfig {
                base_url: "https://akniga.org".to_string(),
                book_data_prefix: "/ajax/b/".to_string(),
                manifest_marker: "m3u8".to_string(),
                cover_thumbnail_marker: "100x100crop".to_string(),
                cover_large_marker: "400x".to_string(),
                series_selector: ".caption__article--about-block.about--series a".to_string(),
                series_book_link_selector: "a.content__article-main-link".to_string(),
            },
            browser: BrowserConfig {
                chrome_executable: None,
                headless: true,
                settle_ms: 3000,
                navigation_timeout_secs: 60,
                extra_args: Vec::new(),
            },
            media: MediaConfig {
                ffmpeg_path: "ffmpeg".to_string(),
            },
            app: AppConfig {
                output_dir: PathBuf::from("."),
                user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("akniga-dl").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let base = Url::parse(&self.site.base_url)
            .with_context(|| format!("Invalid site base URL: {}", self.site.base_url))?;
        if base.host_str().is_none() {
            anyhow::bail!("Site base URL has no host: {}", self.site.base_url);
        }

        if self.site.book_data_prefix.is_empty() {
            anyhow::bail!("Book data prefix must not be empty");
        }

        if self.site.manifest_marker.is_empty() {
            anyhow::bail!("Manifest marker must not be empty");
        }

        for selector in [&self.site.series_selector, &self.site.series_book_link_selector] {
            scraper::Selector::parse(selector)
                .map_err(|e| anyhow::anyhow!("Invalid CSS selector '{}': {}", selector, e))?;
        }

        Ok(())
    }

    /// Host every book URL has to belong to
    pub fn site_host(&self) -> Option<String> {
        Url::parse(&self.site.base_url)
            .ok()?
            .host_str()
            .map(|host| host.trim_start_matches("www.").to_string())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Site: {}", self.site.base_url);
        println!("  Book Data Prefix: {}", self.site.book_data_prefix);
        println!("  Manifest Marker: {}", self.site.manifest_marker);
        match &self.browser.chrome_executable {
            Some(path) => println!("  Chrome: {}", path.display()),
            None => println!("  Chrome: auto-detect"),
        }
        println!("  Headless: {}", self.browser.headless);
        println!("  ffmpeg: {}", self.media.ffmpeg_path);
        println!("  Output Directory: {}", self.app.output_dir.display());
        if let Ok(path) = Self::config_path() {
            println!("  Config File: {}", path.display());
        }
    }
}
