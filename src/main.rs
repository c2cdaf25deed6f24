use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rust_decimal_macros::dec;
use tracing_subscriber::{fmt, EnvFilter};

use p2p_desk::accounts;
use p2p_desk::api;
use p2p_desk::calculator::withdrawal_quote;
use p2p_desk::core::{Asset, Offer, PaymentMethod, PriceOracle, PriceTable, RequestId, Side, UserId};
use p2p_desk::desk::{DeskSettings, TradeDesk, TradeInput};
use p2p_desk::feeds::{CoinGeckoOracle, FixedOracle, PriceFeed};
use p2p_desk::offers::{OfferBook, OfferFilter, OfferGenerator, OfferRefresher};
use p2p_desk::store::JsonStore;
use p2p_desk::viewer::{Role, ViewerSession, ViewerTiming};
use p2p_desk::{Config, Error};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,p2p_desk=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    tracing::info!("p2p-desk starting...");
    let config = Config::load_default();

    // 1. Price oracle; offline runs use the static table
    let offline = config.oracle.url.is_empty() || std::env::var("P2P_DESK_OFFLINE").is_ok();
    let oracle: Arc<dyn PriceOracle> = if offline {
        tracing::info!("Offline mode, serving static prices");
        Arc::new(FixedOracle::new(PriceTable::fallback()))
    } else {
        Arc::new(CoinGeckoOracle::new(config.oracle.url.clone(), config.oracle.timeout())?)
    };
    let feed = PriceFeed::new(oracle);
    if feed.refresh().await.is_err() {
        tracing::warn!("Starting on fallback prices");
    }
    let _price_task = feed.spawn_refresh(config.oracle.refresh_interval());

    // 2. Offer book
    let generator = OfferGenerator::from_config(&config.offers, config.trading.min_trade_usd);
    let book = OfferBook::new(generator, config.offers.max_listed);
    book.regenerate(&feed.quotes());
    let _offer_task = OfferRefresher::spawn(book.clone(), feed.clone(), config.offers.refresh_interval());

    // 3. Desk, restored from disk when a data dir is configured
    let store = match &config.app.data_dir {
        Some(dir) => Some(JsonStore::open(dir).context("opening data dir")?),
        None => None,
    };
    let settings = DeskSettings::from(&config);
    let desk = match &store {
        Some(s) => TradeDesk::restore(settings, s.load_desk()),
        None => TradeDesk::new(settings),
    }
    .with_offers(book.clone());
    let user = match &store {
        Some(s) => accounts::resolve_identity(s)?,
        None => UserId::generate(),
    };
    tracing::info!("Acting as {} ({} requests on file)", user, desk.list().len());

    if desk.balance(&user, Asset::Eth) < dec!(0.5) {
        desk.credit(&user, Asset::Eth, dec!(1.5))?;
    }

    let timing = ViewerTiming::from(&config);
    let mut requester = ViewerSession::attach(desk.clone(), Role::Requester(user.clone()), timing);
    let admin = ViewerSession::attach(desk.clone(), Role::Admin, timing);

    // 4. Buy BTC with a bank transfer
    let buy_id = submit_fresh(&book, &mut requester, OfferFilter::new(Side::Buy, Asset::Btc), |_| {
        TradeInput::Buy {
            amount_usd: dec!(250),
            payment_method: PaymentMethod::BankTransfer,
            proof_attached: true,
            wallet_address: None,
        }
    })?;

    // 5. Sell about $400 of ETH, let the escrow run a few seconds, then release
    let sell_id = submit_fresh(&book, &mut requester, OfferFilter::new(Side::Sell, Asset::Eth), |offer| {
        TradeInput::Sell {
            amount_asset: dec!(400).checked_div(offer.rate).unwrap_or_default().round_dp(6),
            payment_method: PaymentMethod::Wise,
            payout_address: "GB29NWBK60161331926819".to_string(),
        }
    })?;
    tokio::time::sleep(Duration::from_secs(3)).await;
    if let Some(escrow) = desk.get(&sell_id).as_ref().and_then(|r| r.escrow()) {
        tracing::info!("Escrow {} at {} ({}% elapsed)", sell_id, escrow.countdown(), escrow.progress_pct());
    }
    requester.release(&sell_id)?;

    // 6. Admin review
    let accepted = admin.accept(&buy_id)?;
    let denied = admin.deny(&sell_id)?;
    tracing::info!("Reviewed: {:?} / {:?}", accepted.status, denied.status);

    // 7. Wallet summary
    let prices = feed.quotes();
    for (asset, qty) in desk.balances(&user) {
        if !qty.is_zero() {
            tracing::info!("  {} {}", qty, asset);
        }
    }
    tracing::info!("Portfolio ${}", desk.portfolio_usd(&user, &prices).round_dp(2));
    let withdrawal = withdrawal_quote(dec!(0.1), "0x52908400098527886E0F7030069857D2E4169EE7")?;
    tracing::info!("Withdraw 0.1 ETH: fee {} receive {}", withdrawal.fee, withdrawal.receive);
    tracing::debug!("Price board: {}", api::price_board(&prices));

    if let Some(s) = &store {
        s.save_desk(&desk.snapshot())?;
        tracing::info!("Saved desk to {}", s.dir().display());
    }

    drop(requester);
    drop(admin);
    tracing::info!("p2p-desk done");
    Ok(())
}

/// Submit against the first listed offer, retrying once if the book
/// regenerated between the listing and the submit.
fn submit_fresh(
    book: &OfferBook,
    requester: &mut ViewerSession,
    filter: OfferFilter,
    input: impl Fn(&Offer) -> TradeInput,
) -> anyhow::Result<RequestId> {
    let mut attempts = 0;
    loop {
        let offer = book
            .filter(&filter)
            .into_iter()
            .next()
            .context("no matching offers")?;
        match requester.submit(&offer, input(&offer)) {
            Err(Error::NotFound(_)) if attempts == 0 => {
                tracing::debug!("Offer {} went stale, retrying", offer.id);
                attempts += 1;
            }
            other => return Ok(other?),
        }
    }
}
