//!  Farewatch Fare Monitor
//!
//!  Copyright (C) 2026  The Farewatch developers
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! CLI for one-shot flight searches.

use anyhow::{Context, Result, bail};
use clap::Parser;
use farewatch_fare_monitor::config::ConfigArgs;
use farewatch_fare_monitor::{
    FareMonitor, FareRecord, MonitorConfig, Passengers, RawQuery, RawSegment, SearchResult,
};
use std::cmp::max;

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "farewatch-flights")]
#[command(author, version, about = "Search flight fares", long_about = None)]
struct CliArgs {
    /// Origin: airport code, city or "City (CODE)"
    #[arg(short, long, default_value = "")]
    from: String,

    /// Destination: airport code, city or "City (CODE)"
    #[arg(short, long, default_value = "")]
    to: String,

    /// Departure: YYYY-MM-DD, today, tomorrow, weekend, +N days, in N days, or a month name
    #[arg(short, long, default_value = "")]
    date: String,

    /// Return date for round trips, same forms as --date
    #[arg(short = 'R', long)]
    return_date: Option<String>,

    /// Multi-city leg as ORIGIN:DESTINATION:DATE, repeat 2 to 5 times
    #[arg(short = 'L', long = "leg")]
    legs: Vec<String>,

    /// Cabin class: economy, premium_economy, business, first
    #[arg(short, long, default_value = "economy")]
    cabin: String,

    /// Number of adults
    #[arg(short, long, default_value = "1")]
    adults: u32,

    /// Number of children
    #[arg(long, default_value = "0")]
    children: u32,

    /// Trip type: one-way, round-trip, multi-city (inferred when omitted)
    #[arg(long)]
    trip: Option<String>,

    /// Maximum number of stops (0 = nonstop only)
    #[arg(long)]
    max_stops: Option<u8>,

    /// Currency for prices, e.g. SEK
    #[arg(long)]
    price_currency: Option<String>,

    /// Rows to show per result table
    #[arg(long, default_value = "5")]
    top: usize,

    /// Print the raw result as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(flatten)]
    config: ConfigArgs,
}

/// Configure logging based on verbosity level
fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse "ARN:LHR:2025-12-01". The date may itself be relative.
fn parse_leg(s: &str) -> Result<RawSegment> {
    let mut parts = s.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(origin), Some(destination), Some(date)) if !date.trim().is_empty() => Ok(RawSegment {
            origin: origin.trim().to_string(),
            destination: destination.trim().to_string(),
            date: date.trim().to_string(),
        }),
        _ => bail!("Invalid leg: {}. Use ORIGIN:DESTINATION:DATE", s),
    }
}

fn build_query(args: &CliArgs) -> Result<RawQuery> {
    let segments = args
        .legs
        .iter()
        .map(|l| parse_leg(l))
        .collect::<Result<Vec<_>>>()?;
    if segments.is_empty() && (args.from.is_empty() || args.to.is_empty() || args.date.is_empty()) {
        bail!("Give --from, --to and --date, or at least two --leg");
    }
    Ok(RawQuery {
        origin: args.from.clone(),
        destination: args.to.clone(),
        depart_date: args.date.clone(),
        return_date: args.return_date.clone(),
        passengers: Passengers {
            children: args.children,
            ..Passengers::adults(args.adults)
        },
        cabin: Some(args.cabin.clone()),
        trip_type: args.trip.clone(),
        segments,
        max_stops: args.max_stops,
        currency: args.price_currency.clone(),
    })
}

/// Format duration in hours/minutes.
fn fmt_duration(minutes: u32) -> String {
    let hrs = minutes / 60;
    let mins = minutes % 60;
    if mins == 0 {
        format!("{}h", hrs)
    } else if hrs == 0 {
        format!("{}m", mins)
    } else {
        format!("{}h {:02}m", hrs, mins)
    }
}

fn duration_label(fare: &FareRecord) -> String {
    fare.duration_minutes
        .map(fmt_duration)
        .unwrap_or_else(|| fare.duration.clone())
}

fn fmt_times(fare: &FareRecord) -> String {
    let dep = if fare.departure.is_empty() { "??:??" } else { &fare.departure };
    let arr = if fare.arrival.is_empty() { "??:??" } else { &fare.arrival };
    format!("{} → {}", dep, arr)
}

fn fmt_stops(stops: u32) -> String {
    match stops {
        0 => "direct".to_string(),
        1 => "1 stop".to_string(),
        n => format!("{} stops", n),
    }
}

/// Get terminal width for responsive tables
fn get_terminal_width() -> usize {
    term_size::dimensions().map(|(w, _)| w).unwrap_or(100)
}

fn dash_bar() -> String {
    "-".repeat(get_terminal_width().min(100))
}

/// Calculate terminal-aware column widths
fn calc_column_widths(fares: &[FareRecord]) -> (usize, usize, usize, usize) {
    let mut carrier_w = 7;
    let mut times_w = 15;
    let mut duration_w = 10;
    let mut stops_w = 8;

    for fare in fares {
        carrier_w = max(carrier_w, fare.carrier.chars().count());
        times_w = max(times_w, fmt_times(fare).chars().count());
        duration_w = max(duration_w, duration_label(fare).chars().count());
        stops_w = max(stops_w, fmt_stops(fare.stops).len());
    }

    let available = get_terminal_width().saturating_sub(25);
    let total = carrier_w + times_w + duration_w + stops_w;
    if total > available && available > 50 {
        let ratio = available as f64 / total as f64;
        carrier_w = max((carrier_w as f64 * ratio).floor() as usize, 4);
        times_w = max((times_w as f64 * ratio).floor() as usize, 10);
        duration_w = max((duration_w as f64 * ratio).floor() as usize, 5);
        stops_w = max((stops_w as f64 * ratio).floor() as usize, 6);
    }
    (carrier_w, times_w, duration_w, stops_w)
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Render one result to stdout
fn render_result(result: &SearchResult, top: usize) {
    println!("{}", "=".repeat(96));
    println!("  🛫  {}", result.query);
    println!("{}\n", "=".repeat(96));

    match result.lowest_price() {
        Some(best) => println!("💰 Best Price:  {}", best),
        None => println!("💰 Best Price:  n/a"),
    }
    println!("📊 Total Flights: {}", result.total_flights());
    if let Some(level) = result.price_level {
        println!("📈 Prices are currently {:?}", level);
    }
    println!("🔗 Search URL: {}", result.deep_link);
    println!("🆔 Search id: {}", result.search_id);

    if result.fares.is_empty() {
        println!("\nNo flights found.\n");
        return;
    }

    let mut fares = result.fares.clone();
    fares.sort_by_key(|f| f.price.amount_minor);
    let shown = &fares[..top.min(fares.len())];
    let (cw, tw, dw, sw) = calc_column_widths(shown);

    println!("\n🏆 Top {} Results:", shown.len());
    println!("{}", dash_bar());
    println!(
        "  {:>3}  {:<cw$}  {:<tw$}  {:<dw$}  {:<sw$}   PRICE",
        "#", "AIRLINE", "DEP → ARR", "DURATION", "STOPS"
    );
    println!("{}", dash_bar());
    for (i, fare) in shown.iter().enumerate() {
        let delay = fare.delay.as_deref().map(|d| format!("  ({})", d)).unwrap_or_default();
        println!(
            "  {:>3}  {:<cw$}  {:<tw$}  {:<dw$}  {:<sw$}   {}{}",
            i + 1,
            truncate(&fare.carrier, cw),
            truncate(&fmt_times(fare), tw),
            duration_label(fare),
            fmt_stops(fare.stops),
            fare.price,
            delay
        );
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging(args.verbose);

    tracing::info!("Starting farewatch-flights CLI");
    tracing::debug!("Args: {:?}", args);

    let raw = build_query(&args)?;
    let config: MonitorConfig = args.config.clone().into();
    let monitor = FareMonitor::start(config)
        .await
        .context("Failed to start fare monitor")?;

    let multi_city = !raw.segments.is_empty()
        || args
            .trip
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("multi-city"));

    if multi_city {
        let outcome = monitor
            .search_multi_city(&raw)
            .await
            .context("Multi-city search failed")?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            monitor.flush().await;
            return Ok(());
        }
        for segment in &outcome.results {
            println!("Leg {}", segment.leg);
            render_result(&segment.result, args.top);
        }
        for failure in &outcome.failures {
            println!("⚠️  Leg {} failed: {}", failure.leg, failure.error);
        }
    } else {
        let result = monitor.search(&raw).await.context("Search failed")?;
        tracing::info!(
            "Search completed: {} flights found, best price: {}",
            result.total_flights(),
            result
                .lowest_price()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "n/a".into())
        );
        if args.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
            monitor.flush().await;
            return Ok(());
        }
        render_result(&result, args.top);
    }

    monitor.flush().await;
    Ok(())
}
