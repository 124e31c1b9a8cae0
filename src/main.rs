mod cli;
mod mkfs;
mod mount;

use clap::Parser;
use cli::{Cli, Command};
use slatefs::{DirListing, Stat};
use std::{fs::OpenOptions, path::Path};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.log_file.as_deref())?;

    match cli.command {
        Command::Mkfs(args) => mkfs::make(
            &args.image,
            &args.size,
            args.inode_percent,
            args.block_size.bytes(),
            args.force,
        )?,
        Command::Mkdir(args) => {
            mount::with_mounted(&args.image, |fs| fs.mkdir(&args.path))?;
        }
        Command::Rmdir(args) => mount::with_mounted(&args.image, |fs| fs.rmdir(&args.path))?,
        Command::Touch(args) => {
            mount::with_mounted(&args.image, |fs| fs.create(&args.path))?;
        }
        Command::Rm(args) => mount::with_mounted(&args.image, |fs| fs.remove(&args.path))?,
        Command::Write(args) => {
            let written = mount::with_mounted(&args.image, |fs| {
                let handle = fs.open(&args.path)?;
                fs.write(handle, args.offset, args.data.as_bytes())
            })?;
            println!("{} bytes written", written);
        }
        Command::Cat(args) => {
            let content = mount::with_mounted(&args.image, |fs| {
                let handle = fs.open(&args.path)?;
                match args.length {
                    Some(length) => fs.read(handle, args.offset, length),
                    None if args.offset == 0 => fs.read_all(handle),
                    // the length is clamped to the end of the file
                    None => fs.read(handle, args.offset, usize::MAX),
                }
            })?;
            println!("{}", String::from_utf8_lossy(&content));
        }
        Command::Ls(args) => {
            let rows = mount::with_mounted(&args.image, |fs| fs.list(&args.path))?;
            print!("{}", render_listing(&rows));
        }
        Command::Bitmap(args) => {
            let preview = mount::with_mounted(&args.image, |fs| fs.print_bitmap())?;
            println!("{}", preview);
        }
        Command::Info(args) => match &args.path {
            Some(path) => {
                let stat = mount::with_mounted(&args.image, |fs| fs.stat(path))?;
                print!("{}", render_stat(&stat));
            }
            None => {
                let (sb, usage) = mount::with_mounted(&args.image, |fs| {
                    Ok((fs.superblock()?.clone(), fs.usage()?))
                })?;
                println!("block size:     {}", sb.block_size);
                println!("total size:     {}", sb.total_size);
                println!(
                    "inodes:         {} used, {} free of {}",
                    usage.used_inodes, usage.free_inodes, usage.inode_count
                );
                println!(
                    "data blocks:    {} used, {} free of {}",
                    usage.used_blocks, usage.free_blocks, usage.data_block_count
                );
                println!("created at:     {}", sb.created_at);
                if let Some(at) = sb.last_mounted_at {
                    println!("last mounted:   {}", at);
                }
                if !usage.is_consistent() {
                    println!("counters disagree with the inode table or the bitmap");
                }
            }
        },
    }

    Ok(())
}

fn init_logger(log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();

    Ok(())
}

fn render_listing(rows: &[DirListing]) -> String {
    rows.iter()
        .map(|row| {
            format!(
                "{}{:o} {:>6} {:>10} {:>12} {}\n",
                row.kind, row.mode, row.inode, row.size, row.created_at, row.name
            )
        })
        .collect()
}

fn render_stat(stat: &Stat) -> String {
    format!(
        "path:     {}\ninode:    {}\ntype:     {}\nmode:     {:o}\nsize:     {}\nblocks:   {}\ncreated:  {}\nmodified: {}\naccessed: {}\n",
        stat.label,
        stat.inode,
        stat.kind,
        stat.mode,
        stat.size,
        stat.blocks,
        stat.created_at,
        stat.modified_at,
        stat.accessed_at
    )
}
