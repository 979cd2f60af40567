//! Sample storage and the event packet format.

pub mod packet;
pub mod sample_store;

pub use packet::{encode_into, Timestamp, TimestampWidth, TransmitPacket};
pub use sample_store::{Sample, SampleStore};
