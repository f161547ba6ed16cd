pub use remote_abac_core as core;
pub use remote_abac_etcd as etcd;
pub use remote_abac_policy as policy;

mod args;
mod authorize;
pub mod reload;
pub mod review;
pub mod source;

pub use self::{
    args::Args,
    authorize::{Authorize, AUTHORIZE_PATH},
    reload::{PolicyWatch, Reloader},
    source::{Fetcher, PolicySnapshot, ScratchFile},
};
