use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Append the log to this file instead of printing it on stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new file system image
    Mkfs(MkfsArgs),

    /// Create a directory
    Mkdir(PathArgs),

    /// Remove an empty directory
    Rmdir(PathArgs),

    /// Create an empty regular file
    Touch(PathArgs),

    /// Remove a regular file
    Rm(PathArgs),

    /// Write bytes into a file
    Write(WriteArgs),

    /// Print the content of a file
    Cat(CatArgs),

    /// List a directory
    Ls(LsArgs),

    /// Show the allocation state of the first data blocks
    Bitmap(ImageArgs),

    /// Show the geometry and usage of an image, or the metadata of one path
    Info(InfoArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum BlockSize {
    #[value(name = "1024")]
    OneKib,
    #[value(name = "2048")]
    TwoKib,
    #[value(name = "4096")]
    FourKib,
}

impl BlockSize {
    pub fn bytes(self) -> u32 {
        match self {
            BlockSize::OneKib => 1024,
            BlockSize::TwoKib => 2048,
            BlockSize::FourKib => 4096,
        }
    }
}

#[derive(Args)]
pub struct MkfsArgs {
    /// Location of the new file system image
    pub image: PathBuf,

    /// Total size of the image, e.g. 100MiB
    #[arg(short, long, default_value = "100MiB")]
    pub size: String,

    /// Share of the image reserved for the inode table, in percent
    #[arg(short, long, default_value_t = 10)]
    pub inode_percent: u32,

    /// Block size in bytes
    #[arg(short, long, value_enum, default_value = "4096")]
    pub block_size: BlockSize,

    /// Overwrite an existing image
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ImageArgs {
    /// Location of the file system image
    pub image: PathBuf,
}

#[derive(Args)]
pub struct PathArgs {
    /// Location of the file system image
    pub image: PathBuf,

    /// Absolute path inside the image
    pub path: String,
}

#[derive(Args)]
pub struct WriteArgs {
    /// Location of the file system image
    pub image: PathBuf,

    /// Absolute path of an existing file
    pub path: String,

    #[arg(short, long, default_value_t = 0)]
    pub offset: u64,

    /// Text to write
    pub data: String,
}

#[derive(Args)]
pub struct CatArgs {
    /// Location of the file system image
    pub image: PathBuf,

    /// Absolute path of an existing file
    pub path: String,

    #[arg(short, long, default_value_t = 0)]
    pub offset: u64,

    /// Number of bytes to read, up to the end of the file by default
    #[arg(short, long)]
    pub length: Option<usize>,
}

#[derive(Args)]
pub struct LsArgs {
    /// Location of the file system image
    pub image: PathBuf,

    #[arg(default_value = "/")]
    pub path: String,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Location of the file system image
    pub image: PathBuf,

    pub path: Option<String>,
}
