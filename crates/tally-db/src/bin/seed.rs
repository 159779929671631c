//! # Seed Data Generator
//!
//! Populates a database with cashier drawers, products and settings for
//! development.
//!
//! ## Usage
//! ```bash
//! # Seed the default tenant
//! cargo run -p tally-db --bin seed
//!
//! # Specify database path and tenant
//! cargo run -p tally-db --bin seed -- --db ./data/tally.db --tenant store-7
//! ```
//!
//! ## Generated Data
//! - One open drawer per cashier, each with an opening float
//! - Products with base stock, plus a per-location level for the first few
//! - An approved stock adjustment and a handful of sales
//! - Business settings that clamp negative stock

use chrono::{Duration, Utc};
use std::env;
use tally_core::{
    AdjustmentLine, AdjustmentStatus, BusinessSettings, Money, SaleLine, StockKey,
};
use tally_db::{Database, DbConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Cashiers and their opening float in cents.
const CASHIERS: &[(&str, &str, i64)] = &[
    ("cashier-ana", "Front Counter", 20_000),
    ("cashier-ben", "Drive Through", 15_000),
    ("cashier-cho", "Back Office", 50_000),
];

/// Products and their base stock.
const PRODUCTS: &[(&str, &str, i64)] = &[
    ("bev-cola", "Cola 330ml", 120),
    ("bev-water", "Still Water 500ml", 200),
    ("snk-chips", "Salted Chips", 45),
    ("snk-choc", "Milk Chocolate Bar", 5),
    ("dry-milk", "Whole Milk 1L", 30),
    ("gro-rice", "White Rice 1kg", 0),
];

const SEED_LOCATION: &str = "store-front";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./tally_dev.db");
    let mut tenant_id = String::from("tenant-dev");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--tenant" | "-t" => {
                if i + 1 < args.len() {
                    tenant_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tally POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>      Database file path (default: ./tally_dev.db)");
                println!("  -t, --tenant <ID>    Tenant to seed (default: tenant-dev)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            other => warn!(argument = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    info!(database = %db_path, tenant_id = %tenant_id, "Seeding database");

    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.drawers().list_active(&tenant_id).await?;
    if !existing.is_empty() {
        warn!(
            drawers = existing.len(),
            "Tenant already has drawers, skipping seed. Delete the database file to regenerate."
        );
        return Ok(());
    }

    let now = Utc::now();

    // Drawers
    for (user_id, name, float) in CASHIERS {
        let drawer = db
            .drawers()
            .insert(&tenant_id, user_id, name, Some(SEED_LOCATION), now)
            .await?;
        let (drawer, _) = db
            .drawers()
            .open(&tenant_id, &drawer.id, Money::from_cents(*float), user_id, now)
            .await?;
        info!(drawer_id = %drawer.id, user_id = %user_id, balance = %drawer.current_balance, "Drawer opened");
    }

    // Products
    let inventory = db.inventory();
    for (index, (product_id, name, stock)) in PRODUCTS.iter().enumerate() {
        inventory
            .upsert_product(&tenant_id, product_id, name, *stock, now)
            .await?;
        if index < 3 {
            let key = StockKey::new(*product_id, Some(SEED_LOCATION), None);
            inventory
                .set_base_stock(&tenant_id, &key, stock / 2, now)
                .await?;
        }
    }

    let adjustment = inventory
        .create_adjustment(
            &tenant_id,
            None,
            &[AdjustmentLine {
                product_id: "snk-chips".to_string(),
                variant_id: None,
                quantity: -3,
            }],
            Some("Damaged in delivery"),
            CASHIERS[2].0,
            now,
        )
        .await?;
    inventory
        .review_adjustment(&tenant_id, &adjustment, AdjustmentStatus::Approved, now)
        .await?;

    for (hours_ago, product_id, quantity) in [(2, "bev-cola", 6), (5, "snk-choc", 8), (30, "bev-water", 12)] {
        inventory
            .record_sale(
                &tenant_id,
                Some(SEED_LOCATION),
                &[SaleLine {
                    product_id: product_id.to_string(),
                    variant_id: None,
                    quantity,
                }],
                now - Duration::hours(hours_ago),
            )
            .await?;
    }

    db.settings()
        .upsert(&tenant_id, BusinessSettings::default(), now)
        .await?;

    info!(
        drawers = CASHIERS.len(),
        products = PRODUCTS.len(),
        "Seed complete"
    );

    db.close().await;
    Ok(())
}
