use anyhow::Context;
use clap::Parser;
use geofuse::config::Config;
use geofuse::location::{LocationQuery, LocationResolver, QueryContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// geofuse: resolve a place name to a validated coordinate
///
/// Picks the intended place among same-named candidates, queries curated data
/// and geocoders concurrently, and fuses the answers. With --chapter, also
/// locates each chapter title inside the site.
///
/// Examples:
///   geofuse 경복궁 --lang ko
///   geofuse Cambridge --region Massachusetts
///   geofuse 용궁사 --lang ko --hint "바다 옆"
///   geofuse 경복궁 --lang ko --chapter "광화문" --chapter "경회루 주변"
///   geofuse --serve --port 8080
#[derive(Parser)]
#[command(name = "geofuse", version, about, long_about = None)]
struct Cli {
    /// Place name. Example: geofuse "Eiffel Tower"
    #[arg(index = 1, required_unless_present = "serve")]
    name: Option<String>,

    /// Language of the name and of guidance text (ko, en, ja, zh).
    #[arg(long, short = 'l', default_value = "en")]
    lang: String,

    /// Region hint (province, state, city).
    #[arg(long)]
    region: Option<String>,

    /// Country name hint.
    #[arg(long)]
    country: Option<String>,

    /// Country hint (ISO 3166-1 alpha-2, e.g. KR, US, FR).
    #[arg(long)]
    country_code: Option<String>,

    /// Place category (temple, palace, ...).
    #[arg(long)]
    category: Option<String>,

    /// Free-text hint, e.g. "the one by the sea".
    #[arg(long)]
    hint: Option<String>,

    /// Chapter title to locate inside the site. Repeatable.
    #[arg(long = "chapter")]
    chapters: Vec<String>,

    /// Offline mode: curated data and gazetteer only.
    #[arg(long)]
    offline: bool,

    /// Config file (TOML). Defaults to ~/.config/geofuse/config.toml.
    #[arg(long, env = "GEOFUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Start the HTTP API instead of resolving a name.
    #[arg(long)]
    serve: bool,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 3000)]
    port: u16,
}

impl Cli {
    fn query(&self, name: &str) -> anyhow::Result<LocationQuery> {
        let query = LocationQuery::new(name, &self.lang)?;
        Ok(query.with_context(QueryContext {
            region: self.region.clone(),
            country: self.country.clone(),
            country_code: self.country_code.clone(),
            category: self.category.clone(),
            hint: self.hint.clone(),
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let resolver = Arc::new(
        LocationResolver::from_config(&config, cli.offline).context("loading curated datasets")?,
    );
    tracing::debug!(sources = ?resolver.sources(), "resolver ready");

    if cli.serve {
        geofuse::server::start(resolver, &cli.host, cli.port)
            .await
            .with_context(|| format!("serving on {}:{}", cli.host, cli.port))?;
        return Ok(());
    }

    let name = cli.name.as_deref().context("no place name given")?;
    let query = cli.query(name)?;

    if cli.chapters.is_empty() {
        let resolved = resolver.resolve(&query).await?;
        eprintln!("  {} {}", "\u{1F4CD}", resolved.display_line());
        if resolved.should_show_alternatives {
            for alt in &resolved.alternatives {
                eprintln!("  \u{26A0}\u{FE0F}  Did you mean {} ({})?", alt.display_name, alt.region);
            }
        }
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        let package = resolver.resolve_package(&query, &cli.chapters).await?;
        eprintln!("  {} {}", "\u{1F4CD}", package.location.display_line());
        for chapter in &package.chapters {
            let c = &chapter.coordinate_result;
            eprintln!(
                "    {}. {} -> {} [{:?}, \u{00B1}{:.0} m]",
                chapter.id + 1,
                chapter.title,
                geofuse::geo::format_coords(c.coordinate.lat, c.coordinate.lng),
                c.tier.tier,
                c.accuracy_m,
            );
        }
        println!("{}", serde_json::to_string_pretty(&package)?);
    }
    Ok(())
}
