use crate::db::{DbPool, OrmConn};
use crate::notifier::Notifier;
use crate::payment::gateway::GatewayClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub gateway: GatewayClient,
    pub notifier: Notifier,
}
