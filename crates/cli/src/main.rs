use clap::{Parser, Subcommand};

use epubkit_core::config::{config_path, load_config, parse_options_from_config, AppConfig};
use epubkit_core::document::{ContentBlock, EpubDocument, TableOfContentsEntry};
use epubkit_core::reader::parse_path;

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "epubkit")]
#[command(about = "Inspect EPUB chapters, navigation, and content blocks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show title, author, identifier, and counts
    Info {
        /// Input file
        #[arg(required = true)]
        input: String,
    },

    /// List reconciled chapters
    Chapters {
        /// Input file
        #[arg(required = true)]
        input: String,
    },

    /// Print the table of contents tree
    Toc {
        /// Input file
        #[arg(required = true)]
        input: String,
    },

    /// Print the content blocks of one chapter
    Blocks {
        /// Input file
        #[arg(required = true)]
        input: String,

        /// Chapter index as listed by `chapters`
        #[arg(short, long, default_value = "0")]
        chapter: usize,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Write a default config file
    Init,
    /// Print the config file location
    Path,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Info { input } => run_info(input, cli.json),
        Commands::Chapters { input } => run_chapters(input, cli.json),
        Commands::Toc { input } => run_toc(input, cli.json),
        Commands::Blocks { input, chapter } => run_blocks(input, *chapter, cli.json),
        Commands::Config { action } => run_config(action, cli.json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn open(input: &str) -> Result<EpubDocument, Box<dyn std::error::Error + Send + Sync>> {
    let options = parse_options_from_config(&load_config());
    tracing::debug!("Parsing {} with {:?}", input, options);
    Ok(parse_path(input, &options)?)
}

fn run_info(input: &str, json: bool) -> CliResult {
    let doc = open(input)?;

    if json {
        let info = serde_json::json!({
            "title": doc.title,
            "author": doc.author,
            "identifier": doc.identifier,
            "metadata": doc.metadata,
            "chapters": doc.chapters.len(),
            "toc_entries": count_entries(&doc.toc),
            "cover_bytes": doc.cover_image.as_ref().map(Vec::len),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Title: {}", doc.title);
        if let Some(author) = &doc.author {
            println!("Author: {}", author);
        }
        if !doc.identifier.is_empty() {
            println!("Identifier: {}", doc.identifier);
        }
        if !doc.metadata.language.is_empty() {
            println!("Language: {}", doc.metadata.language);
        }
        println!("Chapters: {}", doc.chapters.len());
        println!("TOC entries: {}", count_entries(&doc.toc));
        if let Some(cover) = &doc.cover_image {
            println!("Cover: {} bytes", cover.len());
        }
    }
    Ok(())
}

fn count_entries(entries: &[TableOfContentsEntry]) -> usize {
    entries.iter().map(|e| 1 + count_entries(&e.children)).sum()
}

fn run_chapters(input: &str, json: bool) -> CliResult {
    let doc = open(input)?;

    if json {
        let chapters: Vec<serde_json::Value> = doc
            .chapters
            .iter()
            .enumerate()
            .map(|(index, c)| {
                serde_json::json!({
                    "index": index,
                    "position": c.position,
                    "id": c.id,
                    "title": c.title,
                    "href": c.href,
                    "media_type": c.media_type,
                    "image": c.is_image(),
                    "resources": c.resources.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&chapters)?);
    } else {
        for (index, c) in doc.chapters.iter().enumerate() {
            let title = c.title.as_deref().unwrap_or("[image]");
            println!(
                "{:>3}  spine {:>3}  {:<24} {}  ({} resources)",
                index, c.position, title, c.href, c.resources.len()
            );
        }
    }
    Ok(())
}

fn run_toc(input: &str, json: bool) -> CliResult {
    let doc = open(input)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&doc.toc)?);
    } else {
        print_toc(&doc.toc);
    }
    Ok(())
}

fn print_toc(entries: &[TableOfContentsEntry]) {
    for entry in entries {
        println!("{}{}  -> {}", "  ".repeat(entry.level), entry.title, entry.href);
        print_toc(&entry.children);
    }
}

fn run_blocks(input: &str, chapter: usize, json: bool) -> CliResult {
    let doc = open(input)?;
    let Some(selected) = doc.chapter(chapter) else {
        return Err(format!("Chapter {} out of range (book has {})", chapter, doc.chapters.len()).into());
    };
    let blocks = selected.content_blocks();

    if json {
        let summary: Vec<serde_json::Value> = blocks.iter().map(summarize).collect();
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_blocks(&blocks, 0);
    }
    Ok(())
}

/// JSON form of a block with byte payloads reduced to their length.
fn summarize(block: &ContentBlock) -> serde_json::Value {
    let bytes = |data: &Option<Vec<u8>>| data.as_ref().map(Vec::len);
    match block {
        ContentBlock::Text { text } => serde_json::json!({ "type": "text", "text": text }),
        ContentBlock::Paragraph { text } => serde_json::json!({ "type": "paragraph", "text": text }),
        ContentBlock::LineBreak => serde_json::json!({ "type": "line_break" }),
        ContentBlock::BlockQuote { children } => serde_json::json!({
            "type": "block_quote",
            "children": children.iter().map(summarize).collect::<Vec<_>>(),
        }),
        ContentBlock::Image { src, alt, data } => serde_json::json!({
            "type": "image", "src": src, "alt": alt, "bytes": bytes(data),
        }),
        ContentBlock::Header { level, text } => serde_json::json!({
            "type": "header", "level": level, "text": text,
        }),
        ContentBlock::Link { href, text } => serde_json::json!({
            "type": "link", "href": href, "text": text,
        }),
        ContentBlock::List { items, ordered } => serde_json::json!({
            "type": "list", "ordered": ordered, "items": items,
        }),
        ContentBlock::Table { headers, rows } => serde_json::json!({
            "type": "table", "headers": headers, "rows": rows,
        }),
        ContentBlock::Embed { media_type, src, data } => serde_json::json!({
            "type": "embed", "media_type": media_type, "src": src, "bytes": bytes(data),
        }),
    }
}

fn print_blocks(blocks: &[ContentBlock], depth: usize) {
    let indent = "  ".repeat(depth);
    for block in blocks {
        match block {
            ContentBlock::Text { text } => println!("{indent}{text}"),
            ContentBlock::Paragraph { text } => println!("{indent}{text}\n"),
            ContentBlock::LineBreak => println!(),
            ContentBlock::BlockQuote { children } => {
                println!("{indent}> quote");
                print_blocks(children, depth + 1);
            }
            ContentBlock::Image { src, data, .. } => match data {
                Some(data) => println!("{indent}[image {src}, {} bytes]", data.len()),
                None => println!("{indent}[image {src} not found]"),
            },
            ContentBlock::Header { level, text } => {
                println!("{indent}{} {text}", "#".repeat(usize::from(*level)))
            }
            ContentBlock::Link { href, text } => println!("{indent}[{text}]({href})"),
            ContentBlock::List { items, ordered } => {
                for (i, item) in items.iter().enumerate() {
                    if *ordered {
                        println!("{indent}{}. {item}", i + 1);
                    } else {
                        println!("{indent}- {item}");
                    }
                }
            }
            ContentBlock::Table { headers, rows } => {
                if !headers.is_empty() {
                    println!("{indent}| {} |", headers.join(" | "));
                }
                for row in rows {
                    println!("{indent}| {} |", row.join(" | "));
                }
            }
            ContentBlock::Embed { media_type, src, data } => match data {
                Some(data) => println!("{indent}[{media_type} {src}, {} bytes]", data.len()),
                None => println!("{indent}[{media_type} {src} not found]"),
            },
        }
    }
}

fn run_config(action: &ConfigAction, json: bool) -> CliResult {
    match action {
        ConfigAction::Init => {
            let path = config_path().ok_or("Could not determine config directory")?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml = toml::to_string_pretty(&AppConfig::default())?;
            std::fs::write(&path, toml)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let cfg = load_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        }
        ConfigAction::Path => {
            let path = config_path().ok_or("Could not determine config directory")?;
            if json {
                println!("{}", serde_json::json!({ "path": path }));
            } else {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}
