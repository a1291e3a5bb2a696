use std::sync::Arc;

use crate::{
    config::Config,
    services::sweeper::SweepPolicy,
    store::QuizStore,
    utils::{clock::Clock, timezone::TimeZoneConverter},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QuizStore>,
    pub clock: Arc<dyn Clock>,
    pub converter: TimeZoneConverter,
    pub sweep_policy: SweepPolicy,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn QuizStore>, clock: Arc<dyn Clock>, config: Config) -> Self {
        Self {
            converter: TimeZoneConverter::from_zone_id(&config.default_timezone),
            sweep_policy: SweepPolicy::from_config(&config),
            store,
            clock,
            config,
        }
    }
}
