// Domain layer: records, match results and the ports the engine talks through.

pub mod model;
pub mod ports;
