use std::sync::Arc;

use chrono::Duration;
use tourline_booking::{BookingLedger, PaymentOrchestrator, Reaper, SettlementService};
use tourline_catalog::PhaseRefresher;
use tourline_core::clock::Clock;
use tourline_core::payment::GatewayRegistry;
use tourline_core::repository::BookingStore;
use tourline_core::CoreResult;
use tourline_payment::{ManualGateway, MomoGateway, ProviderHttp, ZaloPayGateway};
use tracing::info;

use crate::app_config::{Config, PaymentConfig};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BookingStore>,
    pub ledger: Arc<BookingLedger>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub phases: Arc<PhaseRefresher>,
    pub reaper: Arc<Reaper>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn BookingStore>,
        clock: Arc<dyn Clock>,
        gateways: GatewayRegistry,
        config: &Config,
    ) -> Result<Self, config::ConfigError> {
        let offset = config.business_rules.utc_offset()?;
        let ledger = Arc::new(
            BookingLedger::new(
                store.clone(),
                clock.clone(),
                config.business_rules.expiry_policy(),
            )
            .with_utc_offset(offset),
        );

        let settlement = Arc::new(SettlementService::new(ledger.clone(), gateways));
        let orchestrator = PaymentOrchestrator::new(settlement)
            .with_reconcile_on_invalid_signature(config.payment.reconcile_on_invalid_signature)
            .with_reconcile_min_age(Duration::seconds(config.scheduler.reconcile_min_age_seconds));

        let phases = PhaseRefresher::new(store.clone(), ledger.inventory().clone(), clock, offset);
        let reaper = Reaper::new(ledger.clone());

        Ok(Self {
            store,
            ledger,
            orchestrator: Arc::new(orchestrator),
            phases: Arc::new(phases),
            reaper: Arc::new(reaper),
        })
    }
}

/// One gateway per configured provider. Manual payments are always on.
pub fn payment_gateways(config: &PaymentConfig) -> CoreResult<GatewayRegistry> {
    let mut registry = GatewayRegistry::new().with(Arc::new(ManualGateway::new()));

    if let Some(zalopay) = &config.zalopay {
        let http = ProviderHttp::new(config.timeout())?;
        registry.register(Arc::new(ZaloPayGateway::new(zalopay.clone(), http)));
    }
    if let Some(momo) = &config.momo {
        let http = ProviderHttp::new(config.timeout())?;
        registry.register(Arc::new(MomoGateway::new(momo.clone(), http)));
    }

    info!(providers = ?registry.providers(), "Payment gateways ready");
    Ok(registry)
}
