pub mod pipeline;

pub use pipeline::run;
