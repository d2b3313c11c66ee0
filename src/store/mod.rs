/*!
Adapters over the two backing services: the indexed key-value store that
holds metadata rows and the object store that holds file bodies.
*/

pub mod index;
pub mod memory;
pub mod objects;
pub mod source;
