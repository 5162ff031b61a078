//! Cloud address resolvers
//!
//! Each resolver implements [`AuthorityResolver`](crate::controller::AuthorityResolver):
//!
//! - [`YandexResolver`] - Yandex Cloud Compute API, authenticated with a
//!   service account key ([`IamTokenSource`])
//! - [`StaticInventory`] - fixed name → addresses map for clusters without a
//!   cloud API (local development, bare metal)

mod iam;
mod inventory;
mod yandex;

pub use iam::{IamTokenSource, ServiceAccountKey, TokenProvider, DEFAULT_IAM_ENDPOINT};
pub use inventory::StaticInventory;
pub use yandex::{YandexResolver, DEFAULT_COMPUTE_ENDPOINT};
