mod client;
mod decode_proptest;
mod framing;
