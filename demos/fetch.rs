use std::time::Duration;

use anyhow::{Context, Result};
use fetchx::{Client, ClientOptions, Request, RequestOptions, TransferDirection};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Fetch a URL and print the response
///
/// Usage: `cargo run --example fetch -- <url>`
#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://example.com/".to_string());

    let client = Client::with_options(
        ClientOptions::new()
            .with_follow_redirects(true)
            .with_cache_resolved(true)
            .with_timeout(Duration::from_secs(10)),
    );

    println!("=== GET {} ===", url);

    let options = RequestOptions::quick()
        .with_max_redirects(5)
        .with_progress(|direction, total| match direction {
            TransferDirection::BytesWritten => tracing::info!(total, "sent"),
            TransferDirection::BytesRead => tracing::info!(total, "received"),
        });

    let request = Request::get(&url).with_context(|| format!("invalid URL {}", url))?;
    let response = client
        .execute(request, options)
        .await
        .with_context(|| format!("request to {} failed", url))?;

    println!("Status: {} {}", response.status().as_u16(), response.reason());
    println!("Final URL: {} ({} redirects)", response.url(), response.redirect_count());
    for (name, value) in response.headers().iter() {
        println!("{}: {}", name, value);
    }

    let body = response.text();
    println!("\nBody length: {} bytes", body.len());
    let preview: String = body.chars().take(200).collect();
    println!("First 200 chars: {}", preview);

    if let Some(cache) = client.resolution_cache() {
        println!("\nResolution cache entries: {}", cache.len());
    }

    Ok(())
}
