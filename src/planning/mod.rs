// Product-space planning: sampling, graph, engine, and reactive repair

pub mod planner;
pub mod product_graph;
pub mod repair;
pub mod sampler;

pub use planner::*;
pub use product_graph::*;
pub use repair::*;
pub use sampler::*;
