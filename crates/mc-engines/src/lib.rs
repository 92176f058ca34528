//! Built-in engines.
//!
//! Each engine implements [`EngineFactory`] and is registered with the
//! server's engine catalog under its own name. The binary selects one with
//! `--engine`.

pub mod dev;

use std::sync::Arc;

use mc_protocol::EngineFactory;

/// Every engine compiled into this crate.
pub fn builtin() -> Vec<Arc<dyn EngineFactory>> {
    vec![Arc::new(dev::DevEngineFactory::new())]
}
