//! Encode/decode the transaction wire format.
//!
//! All multi-byte integers are big-endian. A transaction's header declares
//! `TotalSize` and `DataSize`; when they differ, further chunks sharing the
//! same `ID` follow and must be concatenated before the payload is parsed.

use crate::protocol::{Field, Transaction, HEADER_LEN};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;
use std::io::{Cursor, Read, Result};
use std::mem;
use std::ops::{Shl, Shr};

fn read_exact_vec<R: Read + ?Sized>(r: &mut R, size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; size];
    r.read_exact(&mut buf[..]).and(Ok(buf))
}

/// A serializing-specific result, to overload operators on `Result`.
pub struct SResult<T>(Result<T>);

/// Wraps a `WriteBytesExt` to provide `<<` chaining for encoding.
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    pub fn encode<T: Encodable>(&mut self, data: &T) -> Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut encoder) => match encoder.encode(rhs) {
                Ok(_) => SResult(Ok(encoder)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// Wraps a `ReadBytesExt` to provide `>>` chaining for decoding.
pub struct Decoder<R> {
    reader: R,
}

impl<R: ReadBytesExt> Decoder<R> {
    pub fn new(reader: R) -> Decoder<R> {
        Decoder { reader }
    }

    pub fn decode<T: Decodable>(&mut self) -> Result<T> {
        Decodable::decode(&mut self.reader)
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for Decoder<R> {
    type Output = SResult<Decoder<R>>;
    fn shr(mut self, rhs: &'a mut T) -> Self::Output {
        match self.decode() {
            Ok(v) => {
                *rhs = v;
                SResult(Ok(self))
            }
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for SResult<Decoder<R>> {
    type Output = Self;
    fn shr(self, rhs: &'a mut T) -> Self::Output {
        match self.0 {
            Ok(mut decoder) => match decoder.decode() {
                Ok(v) => {
                    *rhs = v;
                    SResult(Ok(decoder))
                }
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

pub trait Encodable {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u16::<BigEndian>(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u32::<BigEndian>(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for Field {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        match Encoder::new(w) << &self.id << &(self.data.len() as u16) {
            SResult(Ok(mut enc)) => {
                enc.writer.write_all(&self.data)?;
                Ok(enc.bytes_written() + self.data.len())
            }
            SResult(Err(e)) => Err(e),
        }
    }
}

pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8()
    }
}

impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<BigEndian>()
    }
}

impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<BigEndian>()
    }
}

impl Decodable for Field {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let id: u16 = Decodable::decode(r)?;
        let size: u16 = Decodable::decode(r)?;
        let data = read_exact_vec(r, size as usize)?;
        Ok(Field { id, data })
    }
}

/// Encodes a transaction as a single, unchunked frame (`TotalSize == DataSize`).
pub fn encode_transaction(tx: &Transaction) -> Vec<u8> {
    let mut body = Vec::new();
    (tx.fields.len() as u16).encode(&mut body).expect("write to Vec never fails");
    for f in &tx.fields {
        f.encode(&mut body).expect("write to Vec never fails");
    }
    let data_size = body.len() as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.push(tx.flags);
    out.push(tx.is_reply as u8);
    out.extend_from_slice(&tx.ty.to_be_bytes());
    out.extend_from_slice(&tx.id.to_be_bytes());
    out.extend_from_slice(&tx.error_code.to_be_bytes());
    out.extend_from_slice(&data_size.to_be_bytes());
    out.extend_from_slice(&data_size.to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Header of one frame on the wire; may represent one chunk of a larger
/// logical transaction when `total_size > data_size`.
struct FrameHeader {
    flags: u8,
    is_reply: bool,
    ty: u16,
    id: u32,
    error_code: u32,
    total_size: u32,
    data_size: u32,
}

fn decode_header(cur: &mut Cursor<&[u8]>) -> Result<FrameHeader> {
    Ok(FrameHeader {
        flags: Decodable::decode(cur)?,
        is_reply: Decodable::decode::<u8>(cur)? != 0,
        ty: Decodable::decode(cur)?,
        id: Decodable::decode(cur)?,
        error_code: Decodable::decode(cur)?,
        total_size: Decodable::decode(cur)?,
        data_size: Decodable::decode(cur)?,
    })
}

fn decode_payload(bytes: &[u8]) -> Result<Vec<Field>> {
    let mut cur = Cursor::new(bytes);
    let count: u16 = Decodable::decode(&mut cur)?;
    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        fields.push(Decodable::decode(&mut cur)?);
    }
    Ok(fields)
}

/// A `tokio_util::codec::Decoder`/`Encoder` that reassembles chunked
/// transactions before handing a complete one to the connection loop.
///
/// The scanner copies bytes out of `src` (via `split_to`) before decoding
/// them, so no decoded `Field`'s storage aliases the connection's read
/// buffer.
#[derive(Default)]
pub struct TransactionCodec {
    /// In-progress reassembly, keyed by transaction ID, holding the bytes
    /// accumulated so far and the total the header promised.
    pending: HashMap<u32, (u32, Vec<u8>)>,
}

impl TransactionCodec {
    pub fn new() -> TransactionCodec {
        TransactionCodec { pending: HashMap::new() }
    }
}

impl tokio_util::codec::Decoder for TransactionCodec {
    type Item = Transaction;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Transaction>> {
        loop {
            if src.len() < HEADER_LEN {
                return Ok(None);
            }
            let mut cur = Cursor::new(&src[..HEADER_LEN]);
            let header = decode_header(&mut cur)?;
            let frame_len = HEADER_LEN + header.data_size as usize;
            if src.len() < frame_len {
                return Ok(None);
            }

            let frame = src.split_to(frame_len);
            let chunk = frame[HEADER_LEN..].to_vec();

            if header.total_size == header.data_size {
                // Not chunked, or this chunk completes the assembly.
                let full = match self.pending.remove(&header.id) {
                    Some((_, mut acc)) => {
                        acc.extend_from_slice(&chunk);
                        acc
                    }
                    None => chunk,
                };
                let fields = decode_payload(&full)?;
                return Ok(Some(Transaction {
                    flags: header.flags,
                    is_reply: header.is_reply,
                    ty: header.ty,
                    id: header.id,
                    error_code: header.error_code,
                    fields,
                }));
            }

            let entry = self.pending.entry(header.id).or_insert((header.total_size, Vec::new()));
            entry.1.extend_from_slice(&chunk);
            if entry.1.len() as u32 >= entry.0 {
                let (_, full) = self.pending.remove(&header.id).expect("just inserted");
                let fields = decode_payload(&full)?;
                return Ok(Some(Transaction {
                    flags: header.flags,
                    is_reply: header.is_reply,
                    ty: header.ty,
                    id: header.id,
                    error_code: header.error_code,
                    fields,
                }));
            }
            // Chunk buffered, but this transaction is incomplete; loop to
            // see if the next frame for a *different* id is already here.
        }
    }
}

impl tokio_util::codec::Encoder<Transaction> for TransactionCodec {
    type Error = std::io::Error;

    fn encode(&mut self, tx: Transaction, dst: &mut BytesMut) -> Result<()> {
        dst.put_slice(&encode_transaction(&tx));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::field;

    #[test]
    fn transaction_roundtrips_through_the_codec() {
        use tokio_util::codec::{Decoder, Encoder};

        let tx = Transaction::request(
            crate::protocol::TranType::ChatSend,
            42,
            vec![Field::new(field::DATA, b"hi".to_vec())],
        );

        let mut codec = TransactionCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(tx.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.ty, tx.ty);
        assert_eq!(decoded.id, tx.id);
        assert_eq!(decoded.fields, tx.fields);
        assert!(buf.is_empty());
    }

    #[test]
    fn chunked_transaction_reassembles_by_id() {
        use tokio_util::codec::Decoder;

        let field = Field::new(field::DATA, vec![b'x'; 10]);
        let mut body = Vec::new();
        1u16.encode(&mut body).unwrap();
        field.encode(&mut body).unwrap();

        let total = body.len() as u32;
        let (first, second) = body.split_at(body.len() / 2);

        let mut buf = BytesMut::new();
        for chunk in [first, second] {
            buf.extend_from_slice(&[0u8, 0u8]);
            buf.extend_from_slice(&7u16.to_be_bytes());
            buf.extend_from_slice(&99u32.to_be_bytes());
            buf.extend_from_slice(&0u32.to_be_bytes());
            buf.extend_from_slice(&total.to_be_bytes());
            buf.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            buf.extend_from_slice(chunk);
        }

        let mut codec = TransactionCodec::new();
        assert!(codec.decode(&mut buf).unwrap().is_none());
        let tx = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(tx.fields, vec![field]);
    }

    #[test]
    fn field_roundtrips() {
        let f = Field::new(field::USER_NAME, b"Al".to_vec());
        let mut buf = Vec::new();
        f.encode(&mut buf).unwrap();
        let decoded: Field = Decodable::decode(&mut Cursor::new(buf.as_slice())).unwrap();
        assert_eq!(decoded, f);
    }
}
