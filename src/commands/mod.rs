pub mod call_view;

pub use call_view::*;
