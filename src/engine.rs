pub mod clustering;
pub mod density;
pub mod features;
pub mod output;
pub mod pipeline;
pub mod selection;
pub mod stats;
pub mod tabulation;
