// src/main.rs
//! repotag - CLI Entry Point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use repotag::{ActionOptions, Config, Orchestrator, OutputFormat};

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "repotag")]
#[command(version)]
#[command(about = "Mirror package repositories and snapshot them into tags", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/repotag.toml")]
    config: PathBuf,

    /// Log debug detail
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update repositories' head tag from their upstream URLs
    Mirror {
        /// Repository name, 'all', or a pattern with --regex
        repo: String,

        /// Restrict to one architecture
        #[arg(long)]
        arch: Option<String>,

        /// Validate by digest even when sizes are available
        #[arg(long)]
        checksums: bool,

        /// Force full revalidation behavior where applicable
        #[arg(long)]
        force: bool,

        /// Log and skip per-package and per-repo failures
        #[arg(long)]
        ignore_errors: bool,

        /// Treat REPO as a regular expression over repo names
        #[arg(long)]
        regex: bool,
    },

    /// Remove files not referenced by current repository metadata
    Clean {
        /// Repository name, 'all', or a pattern with --regex
        repo: String,

        /// Restrict to one architecture
        #[arg(long)]
        arch: Option<String>,

        /// Treat REPO as a regular expression over repo names
        #[arg(long)]
        regex: bool,

        /// Clean even when metadata cannot be read
        #[arg(long)]
        force: bool,
    },

    /// Generate fresh metadata for a local (non-mirrored) repository
    Init {
        /// Repository name
        repo: String,

        /// Restrict to one architecture
        #[arg(long)]
        arch: Option<String>,
    },

    /// Copy files into a local repository and regenerate metadata
    AddFile {
        /// Repository name
        repo: String,

        /// Target architecture
        #[arg(long)]
        arch: String,

        /// Files to add
        #[arg(required = true)]
        file: Vec<PathBuf>,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Remove files from a local repository and regenerate metadata
    DelFile {
        /// Repository name
        repo: String,

        /// Target architecture
        #[arg(long)]
        arch: String,

        /// File names to remove
        #[arg(required = true)]
        file: Vec<String>,
    },

    /// Snapshot one tag of a repository into another
    Tag {
        /// Repository name
        repo: String,

        /// Destination tag name
        tag: String,

        /// Source tag
        #[arg(long, default_value = "head")]
        src_tag: String,

        /// Create the destination as a symlink instead of a hardlink tree
        #[arg(long)]
        symlink: bool,

        /// Overwrite an existing destination tag
        #[arg(long)]
        force: bool,
    },

    /// Show package-level differences between two tags
    Diff {
        /// Repository name
        repo: String,

        /// Tag to compare against the source tag
        tag: String,

        /// Architecture to compare
        #[arg(long)]
        arch: String,

        /// Source tag
        #[arg(long, default_value = "head")]
        src_tag: String,

        /// Output format: default, json, or csv
        #[arg(long, default_value = "default")]
        format: String,
    },

    /// List configured repositories, or one repository's tags
    List {
        /// Repository name (switches to tag listing)
        repo: Option<String>,

        /// Output format: default, json, or csv
        #[arg(long, default_value = "default")]
        format: String,
    },
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(&cli.config)?;
    let orchestrator = Orchestrator::new(config);

    match cli.command {
        Commands::Mirror {
            repo,
            arch,
            checksums,
            force,
            ignore_errors,
            regex,
        } => {
            let opts = ActionOptions {
                arch,
                checksums,
                force,
                ignore_errors,
            };
            orchestrator.mirror(&repo, regex, &opts)?;
        }

        Commands::Clean {
            repo,
            arch,
            regex,
            force,
        } => {
            let opts = ActionOptions {
                arch,
                force,
                ..Default::default()
            };
            orchestrator.clean(&repo, regex, &opts)?;
        }

        Commands::Init { repo, arch } => {
            let opts = ActionOptions {
                arch,
                ..Default::default()
            };
            orchestrator.init(&repo, &opts)?;
        }

        Commands::AddFile {
            repo,
            arch,
            file,
            force,
        } => {
            let opts = ActionOptions {
                force,
                ..Default::default()
            };
            orchestrator.add_file(&repo, &arch, &file, &opts)?;
        }

        Commands::DelFile { repo, arch, file } => {
            orchestrator.del_file(&repo, &arch, &file, &ActionOptions::default())?;
        }

        Commands::Tag {
            repo,
            tag,
            src_tag,
            symlink,
            force,
        } => {
            let opts = ActionOptions {
                force,
                ..Default::default()
            };
            orchestrator.tag(&repo, &tag, &src_tag, symlink, &opts)?;
        }

        Commands::Diff {
            repo,
            tag,
            arch,
            src_tag,
            format,
        } => {
            let format: OutputFormat = format.parse()?;
            let diff = orchestrator.diff(&repo, &arch, &tag, &src_tag, &ActionOptions::default())?;
            print!("{}", repotag::output::render_diff(&diff, format));
        }

        Commands::List { repo, format } => {
            let format: OutputFormat = format.parse()?;
            match repo {
                Some(repo) => {
                    let listing = orchestrator.list_tags(&repo)?;
                    print!("{}", repotag::output::render_tag_list(&listing, format));
                }
                None => {
                    let listing = orchestrator.list_repos();
                    print!("{}", repotag::output::render_repo_list(&listing, format));
                }
            }
        }
    }

    Ok(())
}
