pub(crate) mod conn;
pub(crate) mod edit;
mod item;
pub(crate) mod parse;
pub(crate) mod sasl;
pub(crate) mod wire;

pub use item::SvnItem;

pub(crate) use item::encode_item;
