/*!
Data structures of the warehouse core: the value union and its string
codec, collection and parser schemas, and the metadata row codec.
*/

pub mod codec;
pub mod metadata;
pub mod registry;
pub mod value;
