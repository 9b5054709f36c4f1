use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sizes_on_demand::config::{self, ServiceConfig};
use sizes_on_demand::deferral::UploadSizeDeferral;
use sizes_on_demand::imaging::RustBackend;
use sizes_on_demand::intercept::RequestInterceptor;
use sizes_on_demand::library::{AssetId, AssetIndex, AttachmentMetadata, LibraryStore};
use sizes_on_demand::materialize::{MaterializeError, SizeMaterializer};
use sizes_on_demand::naming::NamingConvention;
use sizes_on_demand::output;
use sizes_on_demand::resolve::AssetResolver;
use sizes_on_demand::response::ResponseEmitter;
use sizes_on_demand::serve::{self, SiteHandler};
use sizes_on_demand::upload::Uploader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "sizes-on-demand")]
#[command(about = "Serve resized image variants, generating missing ones on first request")]
#[command(long_about = "\
Serve resized image variants, generating missing ones on first request

A request for a derived size that is not on disk, such as

  /wp-content/uploads/2023/05/photo-300x200.jpg

is mapped back to its original (2023/05/photo.jpg), every registered size of
that original is regenerated, and the requested file is streamed back.

Project structure:

  project/
  ├── config.toml              # Optional, overrides stock defaults
  └── uploads/                 # library.uploads_dir
      ├── .library.json        # Attachment records and size metadata
      └── 2023/05/
          ├── photo.jpg        # Original
          └── photo-300x200.jpg

With generation.defer = true, ingest only writes the built-in sizes and records
stubs for custom sizes; those are generated the first time they are requested.

Run 'sizes-on-demand gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Project directory holding config.toml
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the uploads directory, generating missing sizes on request
    Serve,
    /// Upload image files into the library
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Register originals already present in the uploads directory
    Index,
    /// Regenerate every registered size for the given assets
    Regenerate {
        /// Asset ids to regenerate
        ids: Vec<AssetId>,
        /// Regenerate every asset in the library
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },
    /// Validate config and list size records whose files are missing
    Check,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

/// Loaded config plus the opened library.
struct Project {
    config: ServiceConfig,
    uploads_dir: PathBuf,
    store: Arc<LibraryStore>,
}

impl Project {
    fn open(root: &Path) -> Result<Self> {
        let config = config::load_config(root)
            .with_context(|| format!("Failed to load config from {}", root.display()))?;
        init_thread_pool(&config.generation);
        let uploads_dir = config.uploads_dir(root);
        std::fs::create_dir_all(&uploads_dir)
            .with_context(|| format!("Failed to create {}", uploads_dir.display()))?;
        let store = LibraryStore::open(&uploads_dir, &config.library.base_url)
            .context("Failed to open library")?;
        Ok(Self {
            config,
            uploads_dir,
            store: Arc::new(store),
        })
    }

    fn materializer(&self) -> SizeMaterializer<RustBackend> {
        SizeMaterializer::new(
            RustBackend::new(),
            self.store.clone(),
            Arc::new(self.config.registry()),
            self.config.generation.quality(),
            self.config.generation.time_budget(),
        )
    }

    fn resolver(&self) -> AssetResolver {
        AssetResolver::new(self.store.clone(), &self.config.library.base_url)
    }

    fn interceptor(&self) -> Result<RequestInterceptor<RustBackend>> {
        let marker = &self.config.library.marker;
        let naming = NamingConvention::new(marker)
            .with_context(|| format!("Invalid library marker {marker:?}"))?;
        Ok(RequestInterceptor::new(
            naming,
            self.resolver(),
            self.materializer(),
            ResponseEmitter::new(self.config.server.content_type),
            &self.uploads_dir,
        ))
    }

    fn uploader(&self) -> Uploader<RustBackend> {
        Uploader::new(
            RustBackend::new(),
            self.store.clone(),
            Arc::new(self.config.registry()),
            UploadSizeDeferral::new(self.config.generation.defer),
            &self.uploads_dir,
            self.config.library.date_folders,
            self.config.generation.quality(),
        )
    }

    /// Materialize each asset in turn; an id without an original on disk fails.
    fn regenerate(
        &self,
        ids: &[AssetId],
    ) -> Vec<(AssetId, Result<AttachmentMetadata, MaterializeError>)> {
        let resolver = self.resolver();
        let materializer = self.materializer();
        ids.iter()
            .map(|&id| {
                let result = match resolver.resolve_id(id) {
                    Some(asset) => materializer.materialize(&asset),
                    None => Err(MaterializeError::SourceMissing(
                        self.store.attached_file(id).unwrap_or_default(),
                    )),
                };
                (id, result)
            })
            .collect()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Serve => {
            let project = Project::open(&cli.root)?;
            let handler = SiteHandler::new(
                &project.uploads_dir,
                &project.config.library.base_url,
                project.interceptor()?,
            );
            let server = serve::bind(&project.config.server.address)?;
            serve::run(&server, &handler, project.config.server.workers)?;
        }
        Command::Ingest { files } => {
            let uploader = Project::open(&cli.root)?.uploader();
            for file in &files {
                let report = uploader
                    .ingest(file)
                    .with_context(|| format!("Failed to ingest {}", file.display()))?;
                output::print_ingest_report(&report);
            }
        }
        Command::Index => {
            let report = Project::open(&cli.root)?.uploader().adopt_existing()?;
            output::print_adopt_report(&report);
        }
        Command::Regenerate { ids, all } => {
            let project = Project::open(&cli.root)?;
            let ids = if all {
                project.store.attachments().iter().map(|a| a.id).collect()
            } else if ids.is_empty() {
                bail!("Pass asset ids or --all");
            } else {
                ids
            };
            let results = project.regenerate(&ids);
            output::print_regenerate_results(&results);
            if results.iter().any(|(_, r)| r.is_err()) {
                bail!("Some assets failed to regenerate");
            }
        }
        Command::Check => {
            println!("==> Checking {}", cli.root.display());
            let project = Project::open(&cli.root)?;
            output::print_pending_sizes(&project.store.pending_sizes());
            println!("==> Config is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on generation config.
///
/// Caps at the number of available CPU cores; user can constrain down, not up.
fn init_thread_pool(generation: &config::GenerationConfig) {
    let threads = config::effective_threads(generation);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
