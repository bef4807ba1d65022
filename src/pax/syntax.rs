//! PAX extended-header record syntax.
//!
//! One record is `LEN SP key=value LF` where `LEN` is the decimal byte
//! length of the entire record, including the digits of `LEN` itself,
//! the space, the `=` and the trailing LF.  The parser derives the value
//! length by subtracting the computed prefix length and the three fixed
//! separator bytes; the emitter solves the self-including length
//! equation `L = digits(L) + rest`.

use std::io::Read;

use crate::error::{Result, ScarError};
use crate::ioutil::{BlockReader, LimitedReader};
use crate::meta::Meta;

/// Largest accepted record value.  A longer value is corruption, not
/// data.
const MAX_VALUE_LEN: u64 = 16 * 1024 * 1024;

// ── Parsing ──────────────────────────────────────────────────────────────────

/// Parse exactly `size` bytes of PAX records, overlaying recognized
/// fields onto `meta`.  Unknown keywords are skipped by length.
pub fn parse<R: Read>(meta: &mut Meta, r: R, size: u64) -> Result<()> {
    let mut br = BlockReader::new(LimitedReader::new(r, size))?;
    while br.peek().is_some() {
        parse_record(meta, &mut br)?;
    }
    Ok(())
}

/// Parse one record from an already-open block reader.  Exposed for the
/// index iterator, which embeds record payloads in `g` rows.
pub fn parse_records<R: Read>(meta: &mut Meta, br: &mut BlockReader<R>, len: u64) -> Result<()> {
    let mut sub = BlockReader::new(LimitedReader::new(ByRef(br), len))?;
    while sub.peek().is_some() {
        parse_record(meta, &mut sub)?;
    }
    Ok(())
}

/// `&mut R` forwarding reader, so a block reader can lend its stream to
/// a bounded sub-parser without giving up ownership.
struct ByRef<'a, R>(&'a mut R);

impl<R: Read> Read for ByRef<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

fn parse_record<R: Read>(meta: &mut Meta, br: &mut BlockReader<R>) -> Result<()> {
    // The self-including length prefix.
    let mut len: u64 = 0;
    let mut len_digits: u64 = 0;
    loop {
        match br.peek() {
            Some(b' ') => break,
            Some(b @ b'0'..=b'9') => {
                len = len * 10 + (b - b'0') as u64;
                len_digits += 1;
                br.consume()?;
            }
            _ => return Err(ScarError::malformed("bad length prefix in extended header")),
        }
    }
    if len_digits == 0 {
        return Err(ScarError::malformed("empty length prefix in extended header"));
    }
    br.consume()?; // ' '

    // Everything after "LEN ": keyword, '=', value, LF.
    let mut remaining = len
        .checked_sub(len_digits + 1)
        .ok_or_else(|| ScarError::malformed("extended header record shorter than its prefix"))?;

    let mut keyword = Vec::with_capacity(16);
    loop {
        match br.peek() {
            Some(b'=') => break,
            Some(b) => {
                keyword.push(b);
                if keyword.len() > 64 {
                    return Err(ScarError::malformed("extended header keyword too long"));
                }
                remaining = remaining
                    .checked_sub(1)
                    .filter(|&r| r > 0)
                    .ok_or_else(|| ScarError::malformed("extended header keyword overruns record"))?;
                br.consume()?;
            }
            None => return Err(ScarError::malformed("truncated extended header record")),
        }
    }
    br.consume()?; // '='
    remaining = remaining
        .checked_sub(1)
        .ok_or_else(|| ScarError::malformed("extended header record shorter than its prefix"))?;

    let value_len = remaining
        .checked_sub(1) // trailing LF
        .ok_or_else(|| ScarError::malformed("extended header record missing newline"))?;
    if value_len > MAX_VALUE_LEN {
        return Err(ScarError::malformed("extended header value is implausibly large"));
    }

    let mut value = vec![0u8; value_len as usize];
    br.read_exact(&mut value)
        .map_err(|_| ScarError::malformed("truncated extended header value"))?;

    match std::str::from_utf8(&keyword).unwrap_or("") {
        "atime" => meta.atime = Some(parse_time(&value)?),
        "charset" => meta.charset = Some(text(value)),
        "comment" => meta.comment = Some(text(value)),
        "gid" => meta.gid = Some(parse_uint(&value)?),
        "gname" => meta.gname = Some(text(value)),
        "hdrcharset" => meta.hdrcharset = Some(text(value)),
        "linkpath" => meta.linkpath = Some(text(value)),
        "mtime" => meta.mtime = Some(parse_time(&value)?),
        "path" => meta.path = Some(text(value)),
        "size" => meta.size = Some(parse_uint(&value)?),
        "uid" => meta.uid = Some(parse_uint(&value)?),
        "uname" => meta.uname = Some(text(value)),
        _ => {} // unknown keyword: value already skipped by length
    }

    if br.peek() != Some(b'\n') {
        return Err(ScarError::malformed("extended header record missing newline"));
    }
    br.consume()?;
    Ok(())
}

fn text(value: Vec<u8>) -> String {
    String::from_utf8_lossy(&value).into_owned()
}

fn parse_uint(value: &[u8]) -> Result<u64> {
    if value.is_empty() {
        return Err(ScarError::malformed("empty numeric value in extended header"));
    }
    let mut num = 0u64;
    for &b in value {
        if !b.is_ascii_digit() {
            return Err(ScarError::malformed("bad numeric value in extended header"));
        }
        num = num
            .checked_mul(10)
            .and_then(|n| n.checked_add((b - b'0') as u64))
            .ok_or_else(|| ScarError::malformed("numeric value overflows in extended header"))?;
    }
    Ok(num)
}

/// Signed decimal seconds with an optional fractional part.
fn parse_time(value: &[u8]) -> Result<f64> {
    let (sign, rest) = match value.first() {
        Some(&b'-') => (-1.0, &value[1..]),
        _ => (1.0, value),
    };
    if rest.is_empty() {
        return Err(ScarError::malformed("empty time value in extended header"));
    }

    let mut iter = rest.splitn(2, |&b| b == b'.');
    let int_part = iter.next().unwrap();
    let frac_part = iter.next();

    let mut seconds = 0f64;
    for &b in int_part {
        if !b.is_ascii_digit() {
            return Err(ScarError::malformed("bad time value in extended header"));
        }
        seconds = seconds * 10.0 + (b - b'0') as f64;
    }

    // Accumulate the fraction as an integer and divide once, so the
    // result is correctly rounded instead of collecting one rounding
    // error per digit.
    let mut fraction = 0f64;
    if let Some(frac) = frac_part {
        let mut num: u64 = 0;
        let mut digits: i32 = 0;
        for &b in frac {
            if !b.is_ascii_digit() {
                return Err(ScarError::malformed("bad time fraction in extended header"));
            }
            if digits < 15 {
                num = num * 10 + (b - b'0') as u64;
                digits += 1;
            }
        }
        if digits > 0 {
            fraction = num as f64 / 10f64.powi(digits);
        }
    }

    Ok(sign * (seconds + fraction))
}

// ── Emitting ─────────────────────────────────────────────────────────────────

fn decimal_digits(mut num: u64) -> u64 {
    let mut digits = 1;
    while num >= 10 {
        digits += 1;
        num /= 10;
    }
    digits
}

/// Solve `L = digits(L) + rest`.  Adding the digit count can add a digit
/// (rest=9 needs L=11, two digits); one upward adjustment suffices.
pub fn self_delimiting_len(rest: u64) -> u64 {
    let mut digits = decimal_digits(rest.max(1));
    if decimal_digits(rest + digits) > digits {
        digits += 1;
    }
    rest + digits
}

/// Append one `LEN SP key=value LF` record.
pub fn write_field(out: &mut Vec<u8>, key: &str, value: &[u8]) {
    let rest = 1 + key.len() as u64 + 1 + value.len() as u64 + 1;
    let len = self_delimiting_len(rest);

    out.extend_from_slice(len.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(key.as_bytes());
    out.push(b'=');
    out.extend_from_slice(value);
    out.push(b'\n');
}

pub fn write_string(out: &mut Vec<u8>, key: &str, value: &str) {
    write_field(out, key, value.as_bytes());
}

pub fn write_uint(out: &mut Vec<u8>, key: &str, num: u64) {
    write_field(out, key, num.to_string().as_bytes());
}

pub fn write_time(out: &mut Vec<u8>, key: &str, time: f64) {
    write_field(out, key, format_time(time).as_bytes());
}

/// Format seconds with at most nine fractional digits (nanosecond
/// resolution).  Trailing zeros in the fraction are suppressed; if no
/// fraction remains, the decimal point is omitted.
pub fn format_time(time: f64) -> String {
    let negative = time < 0.0;
    let abs = if negative { -time } else { time };

    let mut seconds = abs.floor() as i64;
    let mut nanos = ((abs - abs.floor()) * 1_000_000_000.0).round() as i64;
    if nanos >= 1_000_000_000 {
        seconds += 1;
        nanos = 0;
    }

    let sign = if negative { "-" } else { "" };
    if nanos == 0 {
        return format!("{sign}{seconds}");
    }

    let mut frac = format!("{nanos:09}");
    while frac.ends_with('0') {
        frac.pop();
    }
    format!("{sign}{seconds}.{frac}")
}

/// Encode every present field of a meta as PAX records, in keyword
/// order.  Used for global (`g`) entries, which carry the whole
/// attribute set rather than just the USTAR overflow.
pub fn encode_all(meta: &Meta) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(atime) = meta.atime {
        write_time(&mut out, "atime", atime);
    }
    if let Some(ref charset) = meta.charset {
        write_string(&mut out, "charset", charset);
    }
    if let Some(ref comment) = meta.comment {
        write_string(&mut out, "comment", comment);
    }
    if let Some(gid) = meta.gid {
        write_uint(&mut out, "gid", gid);
    }
    if let Some(ref gname) = meta.gname {
        write_string(&mut out, "gname", gname);
    }
    if let Some(ref hdrcharset) = meta.hdrcharset {
        write_string(&mut out, "hdrcharset", hdrcharset);
    }
    if let Some(ref linkpath) = meta.linkpath {
        write_string(&mut out, "linkpath", linkpath);
    }
    if let Some(mtime) = meta.mtime {
        write_time(&mut out, "mtime", mtime);
    }
    if let Some(ref path) = meta.path {
        write_string(&mut out, "path", path);
    }
    if let Some(size) = meta.size {
        write_uint(&mut out, "size", size);
    }
    if let Some(uid) = meta.uid {
        write_uint(&mut out, "uid", uid);
    }
    if let Some(ref uname) = meta.uname {
        write_string(&mut out, "uname", uname);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_path_and_size() {
        let pax = b"20 path=hello world\n11 size=99\n";
        let mut meta = Meta::empty();
        parse(&mut meta, Cursor::new(pax.to_vec()), pax.len() as u64).unwrap();
        assert_eq!(meta.path.as_deref(), Some("hello world"));
        assert_eq!(meta.size, Some(99));
    }

    #[test]
    fn unknown_keyword_is_skipped() {
        let pax = b"22 SCHILY.xattr=stuff\n11 size=42\n";
        let mut meta = Meta::empty();
        parse(&mut meta, Cursor::new(pax.to_vec()), pax.len() as u64).unwrap();
        assert_eq!(meta.size, Some(42));
    }

    #[test]
    fn parse_times() {
        let pax = b"13 mtime=1.5\n22 atime=-1.000000001\n";
        let mut meta = Meta::empty();
        parse(&mut meta, Cursor::new(pax.to_vec()), pax.len() as u64).unwrap();
        assert_eq!(meta.mtime, Some(1.5));
        assert_eq!(meta.atime, Some(-1.000000001));
    }

    #[test]
    fn parse_rejects_bad_length() {
        let pax = b"99 path=short\n";
        let mut meta = Meta::empty();
        assert!(parse(&mut meta, Cursor::new(pax.to_vec()), pax.len() as u64).is_err());
    }

    #[test]
    fn parse_rejects_empty_keyword_with_undersized_length() {
        // len=2 leaves no room for the separators; the record must be
        // rejected, not wrapped around.
        let pax = b"2 =x\n";
        let mut meta = Meta::empty();
        assert!(parse(&mut meta, Cursor::new(pax.to_vec()), pax.len() as u64).is_err());
    }

    #[test]
    fn len_prefix_is_self_including() {
        for rest in [1u64, 7, 8, 9, 95, 96, 97, 98, 994, 995, 1000, 99_993] {
            let len = self_delimiting_len(rest);
            assert_eq!(len, decimal_digits(len) + rest, "rest={rest}");
        }
    }

    #[test]
    fn emitted_record_length_matches_prefix() {
        for (key, value) in [
            ("path", "x".repeat(1) ),
            ("path", "x".repeat(88)),
            ("path", "x".repeat(89)),
            ("path", "x".repeat(200)),
            ("mtime", "1.5".to_string()),
        ] {
            let mut out = Vec::new();
            write_field(&mut out, key, value.as_bytes());
            let text = String::from_utf8(out.clone()).unwrap();
            let prefix: u64 = text.split(' ').next().unwrap().parse().unwrap();
            assert_eq!(prefix, out.len() as u64, "record {text:?}");
        }
    }

    #[test]
    fn time_formatting() {
        assert_eq!(format_time(1.5), "1.5");
        assert_eq!(format_time(1_700_000_000.0), "1700000000");
        assert_eq!(format_time(0.25), "0.25");
        assert_eq!(format_time(-1.5), "-1.5");
        assert_eq!(format_time(2.000000001), "2.000000001");
        assert_eq!(format_time(3.1000000), "3.1");
        assert_eq!(format_time(0.0), "0");
    }

    #[test]
    fn time_roundtrip_through_record() {
        for t in [1.5f64, 0.0, 123456789.125, -2.25] {
            let mut out = Vec::new();
            write_time(&mut out, "mtime", t);
            let mut meta = Meta::empty();
            parse(&mut meta, Cursor::new(out.clone()), out.len() as u64).unwrap();
            assert_eq!(meta.mtime, Some(t), "record {:?}", String::from_utf8_lossy(&out));
        }
    }

    #[test]
    fn fractional_mtime_record_bytes() {
        let mut out = Vec::new();
        write_time(&mut out, "mtime", 1.5);
        assert_eq!(out, b"13 mtime=1.5\n");
    }
}
