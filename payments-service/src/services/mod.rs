pub mod daraja;
pub mod metrics;
pub mod reconcile;
pub mod repository;
pub mod sweep;

pub use daraja::DarajaClient;
pub use metrics::{get_metrics, init_metrics};
pub use reconcile::Reconciler;
pub use repository::PaymentRepository;
pub use sweep::ReconciliationSweep;
