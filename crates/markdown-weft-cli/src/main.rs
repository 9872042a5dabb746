use anyhow::Result;
use clap::{Parser, Subcommand};
use markdown_weft_config::{Config, FencePreference};
use markdown_weft_engine::{
    Block, ContentStore, DirectionOptions, DocumentSession, FenceStyle, FsStore,
    PlaceholderKind, PlaceholderRegistry, SerializeOptions, SessionOptions, StoreError,
    WriteOutcome, parse_markup, plain_text, serialize,
};
use relative_path::RelativePathBuf;
use std::{path::PathBuf, process};

#[derive(Parser)]
#[command(name = "markdown-weft", version, about = "Markdown transcoding and synchronization")]
struct Cli {
    /// Store root directory (overrides the configured one)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the block outline, direction, fingerprint and embedded blocks
    Inspect {
        /// Document path, relative to the store root
        file: String,
    },
    /// Verify the document round-trips byte for byte
    Check {
        /// Document path, relative to the store root
        file: String,
    },
    /// Rewrite the document in canonical form
    Normalize {
        /// Document path, relative to the store root
        file: String,
        /// Write here instead of back to the document
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    // Settings come from the config file when present; every field has a
    // default, so running without one is fine.
    let config = match Config::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error: Failed to load config file: {e}");
            process::exit(1);
        }
    };

    let root = cli
        .root
        .or_else(|| config.root.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    if !root.is_dir() {
        eprintln!("Error: Store root '{}' is not a directory", root.display());
        process::exit(1);
    }
    let store = FsStore::new(root);

    match cli.command {
        Command::Inspect { file } => inspect(&store, RelativePathBuf::from(file), &config),
        Command::Check { file } => check(&store, RelativePathBuf::from(file), &config),
        Command::Normalize { file, output } => normalize(
            &store,
            RelativePathBuf::from(file),
            output.map(RelativePathBuf::from),
            &config,
        ),
    }
}

fn session_options(config: &Config) -> SessionOptions {
    SessionOptions {
        direction: DirectionOptions {
            auto_detect: config.direction.auto_detect,
            default_rtl: config.direction.default_rtl,
            header_lines: config.direction.header_lines,
            min_rtl_tokens: config.direction.min_rtl_tokens,
            min_density: config.direction.min_density,
        },
        serialize: SerializeOptions {
            explicit_image_attrs: config.serialize.explicit_image_attrs,
        },
        new_block_fence: match config.serialize.default_fence {
            FencePreference::Backtick => FenceStyle::Backtick,
            FencePreference::Colon => FenceStyle::Colon,
        },
    }
}

/// Extract, parse, serialize and reinject, yielding the canonical markup
/// with embedded blocks restored in place.
fn canonical_form(markup: &str, options: &SerializeOptions) -> String {
    let (stripped, registry) = PlaceholderRegistry::extract(markup);
    let tree = parse_markup(&stripped);
    registry.reinject(&serialize(&tree, &registry, options))
}

fn inspect(store: &FsStore, path: RelativePathBuf, config: &Config) -> Result<()> {
    let session = DocumentSession::open(store, path, session_options(config))?;
    let document = session.document();

    println!("{}", session.path());
    println!("  fingerprint: {}", document.fingerprint);
    println!("  direction:   {}", if document.rtl { "rtl" } else { "ltr" });
    println!("  version:     {}", session.remote_version());

    println!("  blocks:");
    for (index, block) in session.render_tree().blocks.iter().enumerate() {
        println!("    {:>3}. {}", index + 1, block_summary(block));
    }

    if !session.registry().is_empty() {
        println!("  embedded blocks:");
        for block in session.registry().iter() {
            println!(
                "    #{} {} ({} fence, {} lines)",
                block.id,
                kind_label(block.kind),
                fence_label(block.fence),
                block.source.lines().count()
            );
        }
    }

    Ok(())
}

fn check(store: &FsStore, path: RelativePathBuf, config: &Config) -> Result<()> {
    let remote = store.read_file(&path)?;
    let options = session_options(config);
    let canonical = canonical_form(&remote.content, &options.serialize);

    if canonical == remote.content {
        println!("{path}: OK");
        return Ok(());
    }

    println!("{path}: drift from canonical form");
    print_divergence(&remote.content, &canonical);
    process::exit(1);
}

fn normalize(
    store: &FsStore,
    path: RelativePathBuf,
    output: Option<RelativePathBuf>,
    config: &Config,
) -> Result<()> {
    let remote = store.read_file(&path)?;
    let options = session_options(config);
    let canonical = canonical_form(&remote.content, &options.serialize);

    let target = output.unwrap_or_else(|| path.clone());
    if target == path && canonical == remote.content {
        println!("{path}: already canonical");
        return Ok(());
    }

    if !store.authenticate()? {
        eprintln!("Error: Store root '{}' is not writable", store.root().display());
        process::exit(1);
    }

    // Writing back in place uses the token we read; a separate output file is
    // overwritten at whatever version it currently holds.
    let expected = if target == path {
        remote.version
    } else {
        match store.read_file(&target) {
            Ok(existing) => existing.version,
            Err(StoreError::NotFound(_)) => remote.version,
            Err(err) => return Err(err.into()),
        }
    };

    match store.write_file(&target, &canonical, &expected, "normalize")? {
        WriteOutcome::Committed { version } => {
            println!("{target}: normalized ({version})");
            Ok(())
        }
        WriteOutcome::Conflict { .. } => {
            eprintln!("Error: {target} changed while normalizing; rerun to retry");
            process::exit(1);
        }
    }
}

fn block_summary(block: &Block) -> String {
    match block {
        Block::Heading { level, content } => {
            format!("heading {}  {}", level, summarize(&plain_text(content)))
        }
        Block::Paragraph { content } => {
            format!("paragraph  {}", summarize(&plain_text(content)))
        }
        Block::List(list) => {
            let style = if list.ordered { "ordered" } else { "bullet" };
            format!("{} list ({} items)", style, list.items.len())
        }
        Block::Quote { blocks } => format!("quote ({} blocks)", blocks.len()),
        Block::Code { language, body } => format!(
            "code [{}] ({} lines)",
            language.as_deref().unwrap_or("plain"),
            body.lines().count()
        ),
        Block::Table(table) => format!(
            "table ({} columns, {} rows)",
            table.header.len(),
            table.rows.len()
        ),
        Block::Image(image) => format!("image  {}", image.src),
        Block::Rule => "rule".to_string(),
        Block::Formula { source } => format!("formula  {}", summarize(source)),
        Block::Placeholder(reference) => format!(
            "{} #{} ({} fence)",
            kind_label(reference.kind),
            reference.id,
            fence_label(reference.fence)
        ),
    }
}

fn kind_label(kind: PlaceholderKind) -> &'static str {
    match kind {
        PlaceholderKind::Diagram => "diagram",
        PlaceholderKind::Formula => "formula",
    }
}

fn fence_label(fence: FenceStyle) -> &'static str {
    match fence {
        FenceStyle::Backtick => "backtick",
        FenceStyle::Colon => "colon",
    }
}

/// One whitespace-collapsed line, clipped for outline display.
fn summarize(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 60 {
        let clipped: String = flat.chars().take(57).collect();
        format!("{clipped}...")
    } else {
        flat
    }
}

/// Print the first differing line with a little context from each side.
fn print_divergence(original: &str, canonical: &str) {
    let original_lines: Vec<&str> = original.lines().collect();
    let canonical_lines: Vec<&str> = canonical.lines().collect();

    let mut line = 0;
    while line < original_lines.len()
        && line < canonical_lines.len()
        && original_lines[line] == canonical_lines[line]
    {
        line += 1;
    }

    println!("first divergence at line {}:", line + 1);
    for text in original_lines.iter().skip(line).take(3) {
        println!("  - {text}");
    }
    for text in canonical_lines.iter().skip(line).take(3) {
        println!("  + {text}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use markdown_weft_engine::Inline;

    #[test]
    fn canonical_form_preserves_embedded_blocks() {
        let markup = "# Title\n\n```mermaid\ngraph TD;\nA-->B\n```\n";
        assert_eq!(
            canonical_form(markup, &SerializeOptions::default()),
            markup
        );
    }

    #[test]
    fn canonical_form_restores_a_fence_touching_the_next_line() {
        let markup = "intro\n```mermaid\ngraph TD;\nA-->B\n```\nafter\n";
        assert_eq!(
            canonical_form(markup, &SerializeOptions::default()),
            "intro\n\n```mermaid\ngraph TD;\nA-->B\n```\nafter\n"
        );
    }

    #[test]
    fn summaries_are_clipped_and_flattened() {
        assert_eq!(summarize("two\n  words"), "two words");
        let long = "word ".repeat(30);
        let clipped = summarize(&long);
        assert!(clipped.ends_with("..."));
        assert_eq!(clipped.chars().count(), 60);
    }

    #[test]
    fn block_summaries_name_the_kind() {
        let heading = Block::Heading {
            level: 2,
            content: vec![Inline::Text("Setup".into())],
        };
        assert_eq!(block_summary(&heading), "heading 2  Setup");

        let tree = parse_markup("- a\n- b\n");
        assert_eq!(block_summary(&tree.blocks[0]), "bullet list (2 items)");
    }

    #[test]
    fn default_config_maps_to_default_engine_options() {
        let options = session_options(&Config::default());
        assert_eq!(options.direction, DirectionOptions::default());
        assert!(options.serialize.explicit_image_attrs);
        assert_eq!(options.new_block_fence, FenceStyle::Backtick);
    }
}
