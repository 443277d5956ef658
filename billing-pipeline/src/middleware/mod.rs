mod feature_flag;

pub use feature_flag::billing_enabled_middleware;
