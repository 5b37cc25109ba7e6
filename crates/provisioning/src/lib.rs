//! Per-user rollup deployment and the sealed payment queue feeding settlement.
pub mod provisioner;
pub mod sealer;
pub mod service;

pub use provisioner::{MockRollupProvisioner, ProvisionedRollup, RollupProvisioner};
pub use sealer::{AesGcmSealer, PayloadSealer};
pub use service::{
    DeploymentReceipt, DeploymentService, DeploymentStatus, PaymentItem, QueuedPayment,
};
