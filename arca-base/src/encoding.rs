pub mod bin;

pub use bin::{
    decode_list, encode_list, ArcaDecode, ArcaEncode, ArcaRead, ArcaWrite, CodecError, SliceReader,
};
