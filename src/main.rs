use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use blockfs::{Directory, Root};

#[derive(Parser)]
#[command(name = "blockfs", about = "Inspect and edit a filesystem stored in a single file")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create and format a new store
    Format {
        store: PathBuf,
        /// Store size in bytes
        #[arg(short, long)]
        size: u64,
    },
    /// List the entries of a directory
    Ls {
        store: PathBuf,
        /// Directory names to descend into, e.g. --dir /docs --dir /old
        #[arg(long = "dir")]
        dirs: Vec<String>,
    },
    /// Create a directory; its name must start with '/'
    Mkdir {
        store: PathBuf,
        name: String,
        #[arg(long = "dir")]
        dirs: Vec<String>,
    },
    /// Copy a host file into the store
    Put {
        store: PathBuf,
        name: String,
        source: PathBuf,
        #[arg(long = "dir")]
        dirs: Vec<String>,
    },
    /// Print the contents of a file
    Cat {
        store: PathBuf,
        name: String,
        #[arg(long = "dir")]
        dirs: Vec<String>,
    },
    /// Remove a file or an empty directory
    Rm {
        store: PathBuf,
        name: String,
        #[arg(long = "dir")]
        dirs: Vec<String>,
    },
    /// Dump the block layout
    Blocks { store: PathBuf },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(error) = run(Args::parse()) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Format { store, size } => {
            blockfs::create(&store, size)
                .with_context(|| format!("failed to format {}", store.display()))?;
            println!("formatted {} ({} bytes)", store.display(), size);
        }
        Command::Ls { store, dirs } => {
            let root = open(&store)?;
            let dir = descend(&root, &dirs)?;
            for name in dir.file_names()? {
                match dir.file(&name)? {
                    Some(file) => println!("{:>10}  {}", file.size()?, name),
                    None => println!("{:>10}  {}", "-", name),
                }
            }
            root.close()?;
        }
        Command::Mkdir { store, name, dirs } => {
            let root = open(&store)?;
            descend(&root, &dirs)?.create_directory(&name)?;
            root.close()?;
        }
        Command::Put { store, name, source, dirs } => {
            let data = fs::read(&source)
                .with_context(|| format!("failed to read {}", source.display()))?;
            let root = open(&store)?;
            let file = descend(&root, &dirs)?.create_file(&name, data.len() as u64)?;
            file.write(0, &data)?;
            root.close()?;
        }
        Command::Cat { store, name, dirs } => {
            let root = open(&store)?;
            let file = match descend(&root, &dirs)?.file(&name)? {
                Some(file) => file,
                None => bail!("no file named '{}'", name),
            };
            io::stdout().write_all(&file.read_all()?)?;
            root.close()?;
        }
        Command::Rm { store, name, dirs } => {
            let root = open(&store)?;
            descend(&root, &dirs)?.remove(&name)?;
            root.close()?;
        }
        Command::Blocks { store } => {
            let root = open(&store)?;
            for block in root.blocks()? {
                let kind = if block.free { "free" } else { "data" };
                match block.next {
                    Some(next) => println!(
                        "{:>12} {:>12} {} -> {}",
                        block.start, block.length, kind, next
                    ),
                    None => println!("{:>12} {:>12} {}", block.start, block.length, kind),
                }
            }
            println!("free space: {} bytes", root.free_space()?);
            root.close()?;
        }
    }
    Ok(())
}

fn open(store: &Path) -> Result<Root> {
    blockfs::open(store).with_context(|| format!("failed to open {}", store.display()))
}

fn descend(root: &Root, dirs: &[String]) -> Result<Directory> {
    let mut dir = root.as_directory().clone();
    for name in dirs {
        dir = match dir.directory(name)? {
            Some(child) => child,
            None => bail!("no directory named '{}' in '{}'", name, dir.name()),
        };
    }
    Ok(dir)
}
