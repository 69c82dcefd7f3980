//! Cross-module flows: lifecycle, HTTP surface and the realtime channel.

#[cfg(test)]
mod harness;

mod http_flows;
mod lifecycle_flows;
mod realtime_flows;
