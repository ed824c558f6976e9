//! Salt CLI - fetch files from your repositories
//!
//! Usage:
//!   salt download <id>                 Download an item by id
//!   salt download-url <url> [name]     Download an arbitrary URL
//!   salt search <query...>             Search cached items
//!   salt update                        Refresh the repository cache
//!   salt list                          List every cached item
//!   salt repo-add <url>                Add a repository
//!   salt extension-install <archive>   Install an extension
//!   salt config <property> [value]     View or set a setting

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use percent_encoding::percent_decode_str;
use salt::repository::Snapshot;
use salt::{
    Config, DownloadOptions, Downloader, ExtensionStore, Paths, RepositoryCache, Transport, output,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "salt")]
#[command(about = "Get specified files from your repositories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Salt data directory (defaults to <data dir>/Salt)
    #[arg(long, global = true, env = "SALT_HOME")]
    home: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a file by id
    #[command(visible_aliases = ["dl", "d", "get", "g"])]
    Download {
        /// Id of the file to download
        id: String,

        /// Skip extension post-processing
        #[arg(long = "no-extensions", visible_alias = "ne")]
        no_extensions: bool,
    },

    /// Download an arbitrary URL into the output directory
    #[command(visible_aliases = ["dlu", "get-url"])]
    DownloadUrl {
        url: String,

        /// File name to save as (defaults to the last URL path segment)
        filename: Option<String>,

        /// Skip extension post-processing
        #[arg(long = "no-extensions", visible_alias = "ne")]
        no_extensions: bool,
    },

    /// Search for files in your repositories
    #[command(visible_aliases = ["s"])]
    Search {
        #[arg(required = true)]
        query: Vec<String>,
    },

    /// Refresh the repository cache
    #[command(visible_aliases = ["u", "update-cache", "uc", "cache", "c", "cache-update", "cu"])]
    Update,

    /// List all files in your repositories
    #[command(visible_aliases = ["ls", "l"])]
    List,

    /// List all files in one repository
    #[command(visible_aliases = ["list-repository", "listrepo", "listr", "lr"])]
    ListRepo {
        /// Id of the repository to list
        id: String,
    },

    /// List configured repositories
    #[command(visible_aliases = ["repo", "r", "repolist", "rl", "list-repos", "listrepos"])]
    RepoList,

    /// Add a repository by the URL of its index
    #[command(visible_aliases = ["repoadd", "ra", "add-repo", "addrepo", "ar"])]
    RepoAdd { url: String },

    /// Remove a repository
    #[command(visible_aliases = ["reporemove", "rr", "remove-repo", "removerepo"])]
    RepoRemove { id: String },

    /// List installed extensions
    #[command(visible_aliases = ["extension", "extensionlist", "el", "list-extensions", "listextensions"])]
    ExtensionList,

    /// Install an extension from an archive
    #[command(visible_aliases = ["extensioninstall", "ei", "install-extension", "installextension", "ie"])]
    ExtensionInstall { archive: PathBuf },

    /// Uninstall an extension
    #[command(visible_aliases = ["extensionuninstall", "eu", "uninstall-extension", "uninstallextension", "ue"])]
    ExtensionUninstall { id: String },

    /// View or set a setting (outputDir, insecureConnections, extensionsEnabled)
    #[command(visible_aliases = ["conf"])]
    Config {
        property: String,
        value: Option<String>,
    },

    /// Print this device's identifier
    Uuid,
}

fn main() {
    if let Err(e) = run() {
        output::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let paths = Paths::discover(cli.home).context("Failed to locate the salt data directory")?;
    let mut config = Config::load(paths).context("Failed to load configuration")?;
    let transport = Transport::from_config(&config);

    match cli.command {
        Commands::Download { id, no_extensions } => {
            let cache = RepositoryCache::new(&config, &transport);
            let outcome = Downloader::new(&config, &transport).download(
                &cache,
                &id,
                DownloadOptions { no_extensions },
            )?;
            print_outputs(&outcome.outputs);
        }

        Commands::DownloadUrl {
            url,
            filename,
            no_extensions,
        } => {
            let filename = match filename {
                Some(name) => name,
                None => filename_from_url(&url)?,
            };
            let outcome = Downloader::new(&config, &transport).download_url(
                &url,
                &filename,
                DownloadOptions { no_extensions },
            )?;
            print_outputs(&outcome.outputs);
        }

        Commands::Search { query } => {
            let cache = RepositoryCache::new(&config, &transport);
            let query = query.join(" ");
            let hits = cache.search(&query)?;
            if hits.is_empty() {
                output::info(&format!("No results for '{}'", query));
                return Ok(());
            }
            let snapshot = cache.get()?;
            for hit in hits {
                if let Some(item) = snapshot.get(&hit.id) {
                    output::list_item(&item.name, &[("id", hit.id.as_str()), ("url", item.url.as_str())]);
                }
            }
        }

        Commands::Update => {
            let cache = RepositoryCache::new(&config, &transport);
            let snapshot = cache.refresh()?;
            output::success(&format!("Cached {} items", snapshot.len()));
        }

        Commands::List => {
            let cache = RepositoryCache::new(&config, &transport);
            print_items(&cache.get()?);
        }

        Commands::ListRepo { id } => {
            let cache = RepositoryCache::new(&config, &transport);
            print_items(&cache.items_of(&id)?);
        }

        Commands::RepoList => {
            let cache = RepositoryCache::new(&config, &transport);
            let repositories = cache.repositories()?;
            let noun = if repositories.len() == 1 {
                "repository"
            } else {
                "repositories"
            };
            output::info(&format!("You have {} {}.", repositories.len(), noun));
            for (id, entry) in repositories.iter() {
                output::list_item(&entry.name, &[("id", id), ("url", entry.url.as_str())]);
            }
        }

        Commands::RepoAdd { url } => {
            let cache = RepositoryCache::new(&config, &transport);
            let (id, entry) = cache
                .add_repository(&url)
                .with_context(|| format!("Failed to add repository {}", url))?;
            output::success(&format!("Added {} ({})", entry.name, id));
        }

        Commands::RepoRemove { id } => {
            let cache = RepositoryCache::new(&config, &transport);
            let entry = cache.remove_repository(&id)?;
            output::success(&format!("Removed {} ({})", entry.name, id));
        }

        Commands::ExtensionList => {
            let store = ExtensionStore::new(&config.paths.extensions_dir);
            let listing = store.list()?;
            if listing.extensions.is_empty() {
                output::info("No extensions installed");
            }
            for extension in &listing.extensions {
                let manifest = extension.manifest();
                println!("{}:", manifest.id.bold());
                print_group("Download Protocols", &manifest.download_protocols);
                print_group("Compatible File Extensions", &manifest.file_extensions);
                let signatures: Vec<String> = manifest
                    .folder_signatures
                    .iter()
                    .map(|group| group.join(", "))
                    .collect();
                print_group("Folder Signatures", &signatures);
            }
        }

        Commands::ExtensionInstall { archive } => {
            let store = ExtensionStore::new(&config.paths.extensions_dir);
            let manifest = store
                .install(&archive)
                .with_context(|| format!("Failed to install {}", archive.display()))?;
            match &manifest.version {
                Some(version) => output::success(&format!("Installed {} {}", manifest.display_name, version)),
                None => output::success(&format!("Installed {}", manifest.display_name)),
            }
        }

        Commands::ExtensionUninstall { id } => {
            let store = ExtensionStore::new(&config.paths.extensions_dir);
            store.uninstall(&id)?;
            output::success(&format!("Uninstalled {}", id));
        }

        Commands::Config { property, value } => match value {
            Some(value) => {
                config.settings.set(&property, &value)?;
                config.settings.save(&config.paths)?;
                println!("{}: {}", property, config.settings.get(&property)?);
            }
            None => println!("{}: {}", property, config.settings.get(&property)?),
        },

        Commands::Uuid => println!("{}", config.device_id),
    }

    Ok(())
}

/// Last non-empty path segment, percent-decoded.
fn filename_from_url(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned());
    match segment {
        Some(name) => Ok(name),
        None => bail!("Cannot derive a file name from {}; pass one explicitly", url),
    }
}

fn print_items(items: &Snapshot) {
    for (id, item) in items {
        output::list_item(&item.name, &[("id", id.as_str()), ("url", item.url.as_str())]);
    }
}

fn print_outputs(paths: &[PathBuf]) {
    for path in paths {
        println!("  {} {}", "->".cyan(), path.display());
    }
}

fn print_group(title: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    println!("   {}", title.blue());
    for value in values {
        println!("       {}", value);
    }
}
