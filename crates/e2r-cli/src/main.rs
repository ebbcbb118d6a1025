#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use e2r::{DirectoryEntry, Ext2Geometry, Ext2Image, InodeNumber, InodeStat, OpenOptions};
use serde::Serialize;
use std::env;
use std::io::Write;
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "E2R_LOG";

// ── Logging ─────────────────────────────────────────────────────────────────

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

// ── Arguments ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct Flags {
    json: bool,
    options: OpenOptions,
}

/// Pull global flags out of `args`, returning them with the positionals.
fn split_flags(args: impl IntoIterator<Item = String>) -> Result<(Flags, Vec<String>)> {
    let mut flags = Flags {
        json: false,
        options: OpenOptions::default(),
    };
    let mut positional = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => flags.json = true,
            "--no-validate" => flags.options.skip_validation = true,
            "--cache-blocks" => {
                let Some(value) = args.next() else {
                    bail!("--cache-blocks requires a value");
                };
                flags.options.cache_blocks = value
                    .parse()
                    .with_context(|| format!("invalid --cache-blocks value: {value}"))?;
            }
            "--help" => positional.push(arg),
            other if other.starts_with("--") => bail!("unknown flag: {other}"),
            _ => positional.push(arg),
        }
    }
    Ok((flags, positional))
}

fn parse_offset(value: &str, what: &str) -> Result<u64> {
    value
        .parse()
        .with_context(|| format!("invalid {what} offset: {value}"))
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    init_logging();

    let (flags, positional) = split_flags(env::args().skip(1))?;
    let mut args = positional.into_iter();
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };
    let rest: Vec<String> = args.collect();
    debug!(command = %command, args = rest.len(), json = flags.json, "dispatch");

    match (command.as_str(), rest.as_slice()) {
        ("inspect", [image]) => inspect(Path::new(image), &flags),
        ("ls", [image]) => ls(Path::new(image), "/", &flags),
        ("ls", [image, path]) => ls(Path::new(image), path, &flags),
        ("cat", [image, path]) => cat(Path::new(image), path, &flags),
        ("read", [image, path, start, end]) => {
            let start = parse_offset(start, "start")?;
            let end = parse_offset(end, "end")?;
            if end < start {
                bail!("end offset {end} precedes start offset {start}");
            }
            read_range(Path::new(image), path, start, end, &flags)
        }
        ("stat", [image, path]) => stat(Path::new(image), path, &flags),
        ("readlink", [image, path]) => readlink(Path::new(image), path, &flags),
        ("--help" | "-h" | "help", _) => {
            print_usage();
            Ok(())
        }
        ("inspect" | "ls" | "cat" | "read" | "stat" | "readlink", _) => {
            print_usage();
            bail!("wrong number of arguments for {command}")
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("e2r\n");
    println!("USAGE:");
    println!("  e2r inspect <image> [--json]");
    println!("  e2r ls <image> [path] [--json]");
    println!("  e2r cat <image> <path>");
    println!("  e2r read <image> <path> <start> <end>");
    println!("  e2r stat <image> <path> [--json]");
    println!("  e2r readlink <image> <path>");
    println!();
    println!("FLAGS:");
    println!("  --no-validate        open without geometry/feature checks");
    println!("  --cache-blocks <N>   block cache size (0 disables)");
    println!();
    println!("ENVIRONMENT:");
    println!("  {LOG_ENV}              log filter (default: warn)");
}

fn open_image(path: &Path, flags: &Flags) -> Result<Ext2Image> {
    Ext2Image::open_with_options(path, &flags.options)
        .with_context(|| format!("failed to open ext2 image {}", path.display()))
}

fn resolve(image: &Ext2Image, path: &str) -> Result<(InodeNumber, e2r::Ext2Inode)> {
    image
        .resolve_path(path)
        .with_context(|| format!("cannot resolve {path}"))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize output")?
    );
    Ok(())
}

// ── inspect ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct InspectOutput {
    filesystem: &'static str,
    #[serde(flatten)]
    geometry: Ext2Geometry,
    state: u16,
    feature_compat: Vec<&'static str>,
    feature_incompat: Vec<&'static str>,
    feature_ro_compat: Vec<&'static str>,
}

fn inspect(path: &Path, flags: &Flags) -> Result<()> {
    let image = open_image(path, flags)?;
    let sb = image.superblock();
    let output = InspectOutput {
        filesystem: "ext2",
        geometry: image.geometry().clone(),
        state: sb.state,
        feature_compat: sb.feature_compat.describe(),
        feature_incompat: sb.feature_incompat.describe(),
        feature_ro_compat: sb.feature_ro_compat.describe(),
    };

    if flags.json {
        return print_json(&output);
    }

    let geo = &output.geometry;
    println!("e2read inspector");
    println!("filesystem: {}", output.filesystem);
    println!("volume_name: {}", geo.volume_name);
    println!("block_size: {}", geo.block_size);
    println!("blocks_count: {}", geo.blocks_count);
    println!("inodes_count: {}", geo.inodes_count);
    println!("group_count: {}", geo.group_count);
    println!("blocks_per_group: {}", geo.blocks_per_group);
    println!("inodes_per_group: {}", geo.inodes_per_group);
    println!("inode_size: {}", geo.inode_size);
    println!("free_blocks: {}", geo.free_blocks_count);
    println!("free_inodes: {}", geo.free_inodes_count);
    println!("rev_level: {}", geo.rev_level);
    println!("features_compat: {}", output.feature_compat.join(" "));
    println!("features_incompat: {}", output.feature_incompat.join(" "));
    println!("features_ro_compat: {}", output.feature_ro_compat.join(" "));
    Ok(())
}

// ── ls ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ListingRow {
    name: String,
    inode: u32,
    permissions: String,
    links: u16,
    owner: &'static str,
    group: &'static str,
    size: u64,
    mtime: u32,
}

impl From<&DirectoryEntry> for ListingRow {
    fn from(entry: &DirectoryEntry) -> Self {
        Self {
            name: entry.name.clone(),
            inode: entry.inode_number.0,
            permissions: entry.inode.permission_string(),
            links: entry.inode.links_count,
            owner: entry.inode.owner_name(),
            group: entry.inode.group_name(),
            size: entry.inode.size,
            mtime: entry.inode.mtime,
        }
    }
}

fn ls(image_path: &Path, path: &str, flags: &Flags) -> Result<()> {
    let image = open_image(image_path, flags)?;
    let (ino, inode) = resolve(&image, path)?;

    let entries = if inode.is_dir() {
        image
            .read_dir(ino)
            .with_context(|| format!("cannot list {path}"))?
    } else {
        let name = path.rsplit('/').find(|c| !c.is_empty()).unwrap_or(path);
        vec![DirectoryEntry {
            inode_number: ino,
            record_length: 0,
            name: name.to_owned(),
            inode,
        }]
    };

    if flags.json {
        let rows: Vec<ListingRow> = entries.iter().map(ListingRow::from).collect();
        return print_json(&rows);
    }
    for entry in &entries {
        println!("{}", entry.listing_line());
    }
    Ok(())
}

// ── cat / read ──────────────────────────────────────────────────────────────

fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(bytes).context("write to stdout")?;
    out.flush().context("flush stdout")
}

fn cat(image_path: &Path, path: &str, flags: &Flags) -> Result<()> {
    let image = open_image(image_path, flags)?;
    let (ino, _) = resolve(&image, path)?;
    let data = image
        .read_file(ino)
        .with_context(|| format!("cannot read {path}"))?;
    write_stdout(&data)
}

fn read_range(image_path: &Path, path: &str, start: u64, end: u64, flags: &Flags) -> Result<()> {
    let image = open_image(image_path, flags)?;
    let (ino, _) = resolve(&image, path)?;
    let data = image
        .read_file_range(ino, start, end - start)
        .with_context(|| format!("cannot read bytes {start}..{end} of {path}"))?;
    write_stdout(&data)
}

// ── stat / readlink ─────────────────────────────────────────────────────────

fn stat(image_path: &Path, path: &str, flags: &Flags) -> Result<()> {
    let image = open_image(image_path, flags)?;
    let (ino, _) = resolve(&image, path)?;
    let stat: InodeStat = image
        .stat(ino)
        .with_context(|| format!("cannot stat {path}"))?;

    if flags.json {
        return print_json(&stat);
    }
    println!("inode: {}", stat.ino.0);
    println!("type: {:?}", stat.kind);
    println!("mode: {:o} ({})", stat.mode, stat.permissions);
    println!("uid: {} ({})", stat.uid, stat.owner);
    println!("gid: {} ({})", stat.gid, stat.group);
    println!("size: {}", stat.size);
    println!("links: {}", stat.links);
    println!("blocks: {}", stat.blocks);
    println!("flags: {:#x}", stat.flags);
    println!("atime: {}", stat.atime);
    println!("ctime: {}", stat.ctime);
    println!("mtime: {}", stat.mtime);
    println!("dtime: {}", stat.dtime);
    let pointers: Vec<String> = stat.block_pointers.iter().map(u32::to_string).collect();
    println!("block_pointers: {}", pointers.join(" "));
    Ok(())
}

fn readlink(image_path: &Path, path: &str, flags: &Flags) -> Result<()> {
    let image = open_image(image_path, flags)?;
    let (ino, _) = resolve(&image, path)?;
    let target = image
        .read_symlink(ino)
        .with_context(|| format!("cannot read link {path}"))?;
    println!("{}", String::from_utf8_lossy(&target));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn flags_are_extracted_from_any_position() {
        let (flags, positional) =
            split_flags(strings(&["ls", "--json", "disk.img", "--no-validate", "/docs"]))
                .expect("parse");
        assert!(flags.json);
        assert!(flags.options.skip_validation);
        assert_eq!(positional, strings(&["ls", "disk.img", "/docs"]));
    }

    #[test]
    fn cache_blocks_takes_a_number() {
        let (flags, _) =
            split_flags(strings(&["cat", "--cache-blocks", "0", "d.img", "/a"])).expect("parse");
        assert_eq!(flags.options.cache_blocks, 0);

        assert!(split_flags(strings(&["cat", "--cache-blocks", "many"])).is_err());
        assert!(split_flags(strings(&["cat", "--cache-blocks"])).is_err());
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = split_flags(strings(&["inspect", "--verbose"])).expect_err("unknown");
        assert!(err.to_string().contains("--verbose"));
    }

    #[test]
    fn defaults_keep_validation_on() {
        let (flags, positional) = split_flags(strings(&["inspect", "x.img"])).expect("parse");
        assert_eq!(flags.options, OpenOptions::default());
        assert!(!flags.json);
        assert_eq!(positional.len(), 2);
    }
}
