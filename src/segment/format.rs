use crate::compression::vbyte;
use crate::core::error::{Error, Result};
use crate::segment::docvalues::{DocValues, KeywordColumn, NumericColumn};
use crate::segment::postings::PostingList;
use crate::segment::segment::{Segment, SegmentId, TextFieldStats};
use chrono::{TimeZone, Utc};
use crc32fast::Hasher;
use roaring::RoaringBitmap;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// Magic prefix of `segment.meta`, followed by one format-version byte.
pub const MAGIC: &[u8; 5] = b"QDSG\x01";
pub const FORMAT_VERSION: u8 = 1;

const KIND_NUMERIC: u8 = 0;
const KIND_KEYWORD: u8 = 1;

const FLAG_POSTINGS: u8 = 1;
const FLAG_DOCVALUES: u8 = 2;
const FLAG_NORMS: u8 = 4;

/// Write `payload + crc32(payload)` and fsync.
fn write_file(path: &Path, payload: &[u8]) -> Result<()> {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    let crc = hasher.finalize();

    let mut file = File::create(path)?;
    file.write_all(payload)?;
    file.write_all(&crc.to_le_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Read a file and verify its trailing CRC32.
fn read_file(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path)?;
    if bytes.len() < 4 {
        return Err(Error::corrupt(format!("{}: too short", path.display())));
    }
    let (payload, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes(crc_bytes.try_into().unwrap());
    let mut hasher = Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != stored {
        return Err(Error::corrupt(format!(
            "{}: checksum mismatch",
            path.display()
        )));
    }
    Ok(payload.to_vec())
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    file: &'a str,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8], file: &'a str) -> Self {
        ByteReader { data, pos: 0, file }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::corrupt(format!("{}: truncated", self.file)));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn vu32(&mut self) -> Result<u32> {
        let (value, consumed) = vbyte::decode_u32(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    fn str16(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::corrupt(format!("{}: bad utf-8", self.file)))
    }

    fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }
}

fn push_str16(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Persist a segment as a directory. Layout is bit-exact and little-endian
/// throughout; every file carries a trailing CRC32.
pub fn write_segment(segment: &Segment, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;

    // segment.meta
    let mut meta = Vec::new();
    meta.extend_from_slice(MAGIC);
    meta.push(FORMAT_VERSION);
    meta.extend_from_slice(segment.id.0.as_bytes());
    meta.extend_from_slice(&segment.sealed_at.timestamp_millis().to_le_bytes());
    meta.extend_from_slice(&(segment.max_doc as u32).to_le_bytes());
    for doc_id in segment.doc_ids() {
        push_str16(&mut meta, doc_id);
    }

    let mut fields: BTreeMap<String, u8> = BTreeMap::new();
    for field in segment.posting_fields() {
        *fields.entry(field.clone()).or_insert(0) |= FLAG_POSTINGS;
    }
    for field in segment.docvalue_fields() {
        *fields.entry(field.clone()).or_insert(0) |= FLAG_DOCVALUES;
    }
    for field in segment.norm_fields() {
        *fields.entry(field.clone()).or_insert(0) |= FLAG_NORMS;
    }

    meta.extend_from_slice(&(fields.len() as u32).to_le_bytes());
    for (field, flags) in &fields {
        push_str16(&mut meta, field);
        meta.push(*flags);
        if flags & FLAG_NORMS != 0 {
            let stats = segment.text_stats(field).unwrap_or_default();
            meta.extend_from_slice(&stats.sum_len.to_le_bytes());
            meta.extend_from_slice(&stats.docs_with_field.to_le_bytes());
        }
    }
    write_file(&dir.join("segment.meta"), &meta)?;

    // postings.{field} + terms.{field}
    for (field, flags) in &fields {
        if flags & FLAG_POSTINGS == 0 {
            continue;
        }
        let terms = segment.field_postings(field).expect("flagged field");
        let mut postings_buf = Vec::new();
        let mut dict_buf = Vec::new();
        dict_buf.extend_from_slice(&(terms.len() as u32).to_le_bytes());

        let mut prev_term: &[u8] = b"";
        for (term, list) in terms {
            let offset = postings_buf.len() as u64;
            let (ords, freqs, positions) = list.encoded_parts();
            postings_buf.extend_from_slice(&list.doc_freq().to_le_bytes());
            postings_buf.extend_from_slice(&list.total_freq().to_le_bytes());
            postings_buf.extend_from_slice(&(ords.len() as u32).to_le_bytes());
            postings_buf.extend_from_slice(ords);
            postings_buf.extend_from_slice(&(freqs.len() as u32).to_le_bytes());
            postings_buf.extend_from_slice(freqs);
            postings_buf.extend_from_slice(&(positions.len() as u32).to_le_bytes());
            for block in positions {
                postings_buf.extend_from_slice(&(block.len() as u32).to_le_bytes());
                postings_buf.extend_from_slice(block);
            }

            // prefix-compressed dictionary entry
            let shared = term
                .iter()
                .zip(prev_term.iter())
                .take_while(|(a, b)| a == b)
                .count();
            vbyte::encode_u32(&mut dict_buf, shared as u32);
            vbyte::encode_u32(&mut dict_buf, (term.len() - shared) as u32);
            dict_buf.extend_from_slice(&term[shared..]);
            dict_buf.extend_from_slice(&offset.to_le_bytes());
            prev_term = term;
        }
        write_file(&dir.join(format!("postings.{}", field)), &postings_buf)?;
        write_file(&dir.join(format!("terms.{}", field)), &dict_buf)?;
    }

    // docvalues.{field}
    for (field, flags) in &fields {
        if flags & FLAG_DOCVALUES == 0 {
            continue;
        }
        let mut buf = Vec::new();
        match segment.doc_values(field).expect("flagged field") {
            DocValues::Numeric(col) => {
                buf.push(KIND_NUMERIC);
                buf.extend_from_slice(&(col.len() as u32).to_le_bytes());
                for cell in col.raw() {
                    buf.extend_from_slice(&cell.to_le_bytes());
                }
            }
            DocValues::Keyword(col) => {
                buf.push(KIND_KEYWORD);
                buf.extend_from_slice(&(col.num_docs() as u32).to_le_bytes());
                for ord in col.raw_ords() {
                    buf.extend_from_slice(&ord.to_le_bytes());
                }
                buf.extend_from_slice(&(col.dict().len() as u32).to_le_bytes());
                for term in col.dict() {
                    push_str16(&mut buf, term);
                }
            }
        }
        write_file(&dir.join(format!("docvalues.{}", field)), &buf)?;
    }

    // norms.{field}
    for (field, flags) in &fields {
        if flags & FLAG_NORMS == 0 {
            continue;
        }
        let norms = segment.field_norms(field).expect("flagged field");
        let mut buf = Vec::new();
        buf.extend_from_slice(&(norms.len() as u32).to_le_bytes());
        buf.extend_from_slice(norms);
        write_file(&dir.join(format!("norms.{}", field)), &buf)?;
    }

    // livedocs
    let live = segment.live_docs();
    let mut buf = Vec::new();
    live.serialize_into(&mut buf)
        .map_err(|e| Error::internal(format!("livedocs serialize: {}", e)))?;
    write_file(&dir.join("livedocs"), &buf)?;

    Ok(())
}

/// Open a segment directory written by `write_segment`. Rejects bad magic,
/// unknown versions and checksum mismatches with `SegmentCorrupt`.
pub fn open_segment(dir: &Path) -> Result<Segment> {
    let meta = read_file(&dir.join("segment.meta"))?;
    let mut r = ByteReader::new(&meta, "segment.meta");

    if r.take(MAGIC.len())? != MAGIC {
        return Err(Error::corrupt("segment.meta: bad magic"));
    }
    let version = r.u8()?;
    if version != FORMAT_VERSION {
        return Err(Error::corrupt(format!(
            "segment.meta: unsupported version {}",
            version
        )));
    }

    let id = SegmentId(Uuid::from_bytes(r.take(16)?.try_into().unwrap()));
    let sealed_millis = r.i64()?;
    let sealed_at = Utc
        .timestamp_millis_opt(sealed_millis)
        .single()
        .ok_or_else(|| Error::corrupt("segment.meta: bad timestamp"))?;
    let max_doc = r.u32()? as usize;

    let mut doc_ids = Vec::with_capacity(max_doc);
    for _ in 0..max_doc {
        doc_ids.push(r.str16()?);
    }

    let num_fields = r.u32()? as usize;
    let mut field_flags = Vec::with_capacity(num_fields);
    let mut text_stats = BTreeMap::new();
    for _ in 0..num_fields {
        let name = r.str16()?;
        let flags = r.u8()?;
        if flags & FLAG_NORMS != 0 {
            let sum_len = r.u64()?;
            let docs_with_field = r.u32()?;
            text_stats.insert(
                name.clone(),
                TextFieldStats {
                    sum_len,
                    docs_with_field,
                },
            );
        }
        field_flags.push((name, flags));
    }
    if !r.at_end() {
        return Err(Error::corrupt("segment.meta: trailing bytes"));
    }

    let mut postings = BTreeMap::new();
    let mut doc_values = BTreeMap::new();
    let mut norms = BTreeMap::new();

    for (field, flags) in &field_flags {
        if flags & FLAG_POSTINGS != 0 {
            let dict_name = format!("terms.{}", field);
            let post_name = format!("postings.{}", field);
            let dict_data = read_file(&dir.join(&dict_name))?;
            let post_data = read_file(&dir.join(&post_name))?;
            let mut d = ByteReader::new(&dict_data, &dict_name);

            let term_count = d.u32()? as usize;
            let mut terms = BTreeMap::new();
            let mut prev_term: Vec<u8> = Vec::new();
            for _ in 0..term_count {
                let shared = d.vu32()? as usize;
                let suffix_len = d.vu32()? as usize;
                if shared > prev_term.len() {
                    return Err(Error::corrupt(format!("{}: bad prefix length", dict_name)));
                }
                let mut term = prev_term[..shared].to_vec();
                term.extend_from_slice(d.take(suffix_len)?);
                let offset = d.u64()? as usize;

                let mut p = ByteReader::new(&post_data, &post_name);
                p.pos = offset;
                if offset > post_data.len() {
                    return Err(Error::corrupt(format!("{}: offset out of range", dict_name)));
                }
                let doc_freq = p.u32()?;
                let total_freq = p.u64()?;
                let ords_len = p.u32()? as usize;
                let ords = p.take(ords_len)?.to_vec();
                let freqs_len = p.u32()? as usize;
                let freqs = p.take(freqs_len)?.to_vec();
                let block_count = p.u32()? as usize;
                let mut blocks = Vec::with_capacity(block_count);
                for _ in 0..block_count {
                    let len = p.u32()? as usize;
                    blocks.push(p.take(len)?.to_vec());
                }

                prev_term = term.clone();
                terms.insert(
                    term,
                    PostingList::from_parts(ords, freqs, blocks, doc_freq, total_freq),
                );
            }
            postings.insert(field.clone(), terms);
        }

        if flags & FLAG_DOCVALUES != 0 {
            let name = format!("docvalues.{}", field);
            let data = read_file(&dir.join(&name))?;
            let mut v = ByteReader::new(&data, &name);
            match v.u8()? {
                KIND_NUMERIC => {
                    let count = v.u32()? as usize;
                    let mut cells = Vec::with_capacity(count);
                    for _ in 0..count {
                        cells.push(v.i64()?);
                    }
                    doc_values.insert(field.clone(), DocValues::Numeric(NumericColumn::new(cells)));
                }
                KIND_KEYWORD => {
                    let count = v.u32()? as usize;
                    let mut ords = Vec::with_capacity(count);
                    for _ in 0..count {
                        ords.push(v.u32()?);
                    }
                    let dict_count = v.u32()? as usize;
                    let mut dict = Vec::with_capacity(dict_count);
                    for _ in 0..dict_count {
                        dict.push(v.str16()?);
                    }
                    doc_values.insert(field.clone(), DocValues::Keyword(KeywordColumn::new(ords, dict)));
                }
                kind => {
                    return Err(Error::corrupt(format!("{}: unknown column kind {}", name, kind)));
                }
            }
        }

        if flags & FLAG_NORMS != 0 {
            let name = format!("norms.{}", field);
            let data = read_file(&dir.join(&name))?;
            let mut n = ByteReader::new(&data, &name);
            let count = n.u32()? as usize;
            norms.insert(field.clone(), n.take(count)?.to_vec());
        }
    }

    let live_data = read_file(&dir.join("livedocs"))?;
    let live = RoaringBitmap::deserialize_from(&live_data[..])
        .map_err(|e| Error::corrupt(format!("livedocs: {}", e)))?;
    let mut deleted = RoaringBitmap::new();
    deleted.insert_range(0..max_doc as u32);
    let deleted = deleted - live;

    Ok(Segment::from_parts(
        id, sealed_at, doc_ids, postings, doc_values, norms, text_stats, deleted,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::types::{Document, FieldValue};
    use crate::schema::mapping::{FieldType, Mapping};
    use crate::segment::builder::SegmentBuilder;
    use std::sync::Arc;

    fn build_segment() -> Segment {
        let mapping = Arc::new(
            Mapping::new()
                .with_field("body", FieldType::Text)
                .with_field("tag", FieldType::Keyword)
                .with_field("price", FieldType::Double)
                .with_field("count", FieldType::Long),
        );
        let mut builder = SegmentBuilder::new(mapping);
        builder
            .add_document(
                &Document::new("doc-1")
                    .with_field("body", FieldValue::Text("the quick brown fox".into()))
                    .with_field("tag", FieldValue::Keyword("animal".into()))
                    .with_field("price", FieldValue::Double(10.5))
                    .with_field("count", FieldValue::Long(3)),
            )
            .unwrap();
        builder
            .add_document(
                &Document::new("doc-2")
                    .with_field("body", FieldValue::Text("quick tests".into()))
                    .with_field("count", FieldValue::Long(-9)),
            )
            .unwrap();
        let segment = builder.seal().unwrap();
        segment.delete(1);
        segment
    }

    #[test]
    fn write_then_open_roundtrips() {
        let segment = build_segment();
        let dir = tempfile::tempdir().unwrap();
        write_segment(&segment, dir.path()).unwrap();
        let reopened = open_segment(dir.path()).unwrap();

        assert_eq!(reopened.max_doc, segment.max_doc);
        assert_eq!(reopened.doc_ids(), segment.doc_ids());
        assert_eq!(
            reopened.field_postings("body"),
            segment.field_postings("body")
        );
        assert_eq!(
            reopened.numeric_values("price").unwrap().raw(),
            segment.numeric_values("price").unwrap().raw()
        );
        assert_eq!(
            reopened.numeric_values("count").unwrap().raw(),
            segment.numeric_values("count").unwrap().raw()
        );
        assert_eq!(
            reopened.keyword_values("tag").unwrap().dict(),
            segment.keyword_values("tag").unwrap().dict()
        );
        assert_eq!(reopened.field_norms("body"), segment.field_norms("body"));
        assert!(!reopened.is_live(1));
        assert!(reopened.is_live(0));
        assert_eq!(reopened.avg_field_len("body"), segment.avg_field_len("body"));
    }

    #[test]
    fn corrupt_magic_rejected() {
        let segment = build_segment();
        let dir = tempfile::tempdir().unwrap();
        write_segment(&segment, dir.path()).unwrap();

        let meta_path = dir.path().join("segment.meta");
        let mut bytes = std::fs::read(&meta_path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&meta_path, &bytes).unwrap();

        let err = open_segment(dir.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SegmentCorrupt);
    }

    #[test]
    fn flipped_payload_byte_fails_checksum() {
        let segment = build_segment();
        let dir = tempfile::tempdir().unwrap();
        write_segment(&segment, dir.path()).unwrap();

        let path = dir.path().join("docvalues.price");
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let err = open_segment(dir.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SegmentCorrupt);
    }
}
