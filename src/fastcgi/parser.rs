//! Parsing of FastCGI records
//!
//! `record` works on a stream: it reports `Incomplete` until the whole
//! record, padding included, is in the buffer. Record contents are parsed
//! as complete input once their length is known.

use crate::fastcgi::{AbortRequest, BeginRequest, Content, EndRequest, NameValuePair,
                     Record, Role, UnknownType, record_kind, VERSION_1};

use nom::bytes::complete::take as take_complete;
use nom::bytes::streaming::take;
use nom::combinator::all_consuming;
use nom::error::{Error, ErrorKind};
use nom::multi::many0;
use nom::number::complete::{be_u8 as be_u8_complete, be_u16 as be_u16_complete,
                            be_u32 as be_u32_complete};
use nom::number::streaming::{be_u8, be_u16};
use nom::IResult;

/// The fixed part of every record
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Header {
    pub version: u8,
    pub kind: u8,
    pub id: u16,
    pub content_length: u16,
    pub padding_length: u8
}

pub fn header(input: &[u8]) -> IResult<&[u8], Header> {
    let (input, version) = be_u8(input)?;
    let (input, kind) = be_u8(input)?;
    let (input, id) = be_u16(input)?;
    let (input, content_length) = be_u16(input)?;
    let (input, padding_length) = be_u8(input)?;
    let (input, _reserved) = be_u8(input)?;

    Ok((input, Header {
        version: version,
        kind: kind,
        id: id,
        content_length: content_length,
        padding_length: padding_length
    }))
}

/// Parses one whole record off the front of `input`
///
/// A version other than 1, or content that doesn't fit its record type, is
/// a `Failure`: the stream can't be trusted past that point.
pub fn record(input: &[u8]) -> IResult<&[u8], Record> {
    let (rest, header) = header(input)?;
    if header.version != VERSION_1 {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify)));
    }

    let (rest, content) = take(header.content_length)(rest)?;
    let (rest, _padding) = take(header.padding_length)(rest)?;

    let content = record_content(header.kind, content)
        .map_err(|_| nom::Err::Failure(Error::new(input, ErrorKind::Verify)))?;

    Ok((rest, Record { id: header.id, content: content }))
}

fn record_content(kind: u8, content: &[u8]) -> Result<Content, nom::Err<Error<&[u8]>>> {
    let parsed = match kind {
        record_kind::BEGIN_REQUEST => begin_request(content)?.1,
        record_kind::ABORT_REQUEST => Content::AbortRequest(AbortRequest),
        record_kind::END_REQUEST => end_request(content)?.1,
        record_kind::PARAMS => Content::Params(content.to_vec()),
        record_kind::STDIN => Content::Stdin(content.to_vec()),
        record_kind::STDOUT => Content::Stdout(content.to_vec()),
        record_kind::STDERR => Content::Stderr(content.to_vec()),
        record_kind::DATA => Content::Data(content.to_vec()),
        record_kind::GET_VALUES => Content::GetValues(name_value_pairs(content)?.1),
        record_kind::GET_VALUES_RESULT =>
            Content::GetValuesResult(name_value_pairs(content)?.1),
        record_kind::UNKNOWN_TYPE => unknown_type(content)?.1,
        kind => Content::Unknown(kind)
    };

    Ok(parsed)
}

fn begin_request(input: &[u8]) -> IResult<&[u8], Content> {
    let (input, role) = be_u16_complete(input)?;
    let (input, flags) = be_u8_complete(input)?;
    let (input, _reserved) = take_complete(5usize)(input)?;

    Ok((input, Content::BeginRequest(BeginRequest {
        role: Role::from_protocol_number(role),
        flags: flags
    })))
}

fn end_request(input: &[u8]) -> IResult<&[u8], Content> {
    let (input, app_status) = be_u32_complete(input)?;
    let (input, protocol_status) = be_u8_complete(input)?;
    let (input, _reserved) = take_complete(3usize)(input)?;

    Ok((input, Content::EndRequest(EndRequest {
        app_status: app_status,
        protocol_status: protocol_status
    })))
}

fn unknown_type(input: &[u8]) -> IResult<&[u8], Content> {
    let (input, kind) = be_u8_complete(input)?;
    let (input, _reserved) = take_complete(7usize)(input)?;

    Ok((input, Content::UnknownType(UnknownType(kind))))
}

/// A name or value length: one byte below 128, otherwise four bytes with
/// the top bit set
fn length(input: &[u8]) -> IResult<&[u8], u32> {
    let (rest, first) = be_u8_complete(input)?;
    if first & 0x80 == 0 {
        return Ok((rest, first as u32));
    }

    let (rest, long) = be_u32_complete(input)?;
    Ok((rest, long & 0x7fff_ffff))
}

pub fn name_value_pair(input: &[u8]) -> IResult<&[u8], NameValuePair> {
    let (input, name_length) = length(input)?;
    let (input, value_length) = length(input)?;
    let (input, name) = take_complete(name_length)(input)?;
    let (input, value) = take_complete(value_length)(input)?;

    Ok((input, NameValuePair::new(name, value)))
}

/// Parses a complete params or management body into its pairs
pub fn name_value_pairs(input: &[u8]) -> IResult<&[u8], Vec<NameValuePair>> {
    all_consuming(many0(name_value_pair))(input)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fastcgi::flags;

    #[test]
    fn begin_request_record() {
        let input = [1, 1, 0, 1, 0, 8, 0, 0,
                     0, 1, 1, 0, 0, 0, 0, 0];

        let (rest, parsed) = record(&input).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, Record {
            id: 1,
            content: Content::BeginRequest(BeginRequest {
                role: Role::Responder,
                flags: flags::KEEP_CONN
            })
        });
    }

    #[test]
    fn unknown_role_still_parses() {
        let input = [1, 1, 0, 7, 0, 8, 0, 0,
                     0, 9, 0, 0, 0, 0, 0, 0];

        let (_, parsed) = record(&input).unwrap();
        match parsed.content {
            Content::BeginRequest(begin) => {
                assert_eq!(begin.role, Role::Unknown(9));
                assert!(!begin.keep_conn());
            },
            other => panic!("unexpected content {:?}", other)
        }
    }

    #[test]
    fn padding_is_skipped() {
        let input = [1, 5, 0, 1, 0, 3, 5, 0,
                     b'a', b'b', b'c', 0, 0, 0, 0, 0,
                     1, 2, 0, 1, 0, 0, 0, 0];

        let (rest, first) = record(&input).unwrap();
        assert_eq!(first.content, Content::Stdin(b"abc".to_vec()));
        let (rest, second) = record(rest).unwrap();
        assert!(rest.is_empty());
        assert_eq!(second.kind(), record_kind::ABORT_REQUEST);
    }

    #[test]
    fn partial_record_is_incomplete() {
        let input = [1, 5, 0, 1, 0, 3, 5, 0,
                     b'a', b'b', b'c', 0, 0];

        for end in 0..input.len() {
            match record(&input[..end]) {
                Err(nom::Err::Incomplete(_)) => (),
                other => panic!("expected Incomplete at {}, got {:?}", end, other)
            }
        }
    }

    #[test]
    fn bad_version_fails() {
        let input = [2, 5, 0, 1, 0, 0, 0, 0];

        match record(&input) {
            Err(nom::Err::Failure(_)) => (),
            other => panic!("expected Failure, got {:?}", other)
        }
    }

    #[test]
    fn short_begin_request_fails() {
        let input = [1, 1, 0, 1, 0, 2, 6, 0,
                     0, 1, 0, 0, 0, 0, 0, 0];

        match record(&input) {
            Err(nom::Err::Failure(_)) => (),
            other => panic!("expected Failure, got {:?}", other)
        }
    }

    #[test]
    fn unknown_record_type() {
        let input = [1, 42, 0, 0, 0, 0, 0, 0];

        let (_, parsed) = record(&input).unwrap();
        assert_eq!(parsed.content, Content::Unknown(42));
        assert_eq!(parsed.kind(), 42);
    }

    #[test]
    fn end_request_record() {
        let input = [1, 3, 0, 2, 0, 8, 0, 0,
                     0, 0, 1, 0, 3, 0, 0, 0];

        let (_, parsed) = record(&input).unwrap();
        assert_eq!(parsed, Record {
            id: 2,
            content: Content::EndRequest(EndRequest { app_status: 256, protocol_status: 3 })
        });
    }

    #[test]
    fn short_pairs() {
        let input = b"\x0b\x02SERVER_PORT80\x0b\x0eSERVER_ADDR199.170.183.42";

        let (_, pairs) = name_value_pairs(input).unwrap();
        assert_eq!(pairs, vec![
            NameValuePair::new("SERVER_PORT", "80"),
            NameValuePair::new("SERVER_ADDR", "199.170.183.42")
        ]);
    }

    #[test]
    fn long_value_length_drops_top_bit() {
        let value = vec![b'x'; 300];
        let mut input = vec![0x04, 0x80, 0x00, 0x01, 0x2c];
        input.extend_from_slice(b"PATH");
        input.extend_from_slice(&value);

        let (rest, pair) = name_value_pair(&input).unwrap();
        assert!(rest.is_empty());
        assert_eq!(pair.name, b"PATH".to_vec());
        assert_eq!(pair.value, value);
    }

    #[test]
    fn long_name_length() {
        let name = vec![b'N'; 128];
        let mut input = vec![0x80, 0x00, 0x00, 0x80, 0x01];
        input.extend_from_slice(&name);
        input.push(b'v');

        let (_, pair) = name_value_pair(&input).unwrap();
        assert_eq!(pair.name, name);
        assert_eq!(pair.value, b"v".to_vec());
    }

    #[test]
    fn truncated_pairs_fail() {
        let input = b"\x0b\x02SERVER_PORT8";
        assert!(name_value_pairs(input).is_err());
    }

    #[test]
    fn get_values_record() {
        let mut input = vec![1, 9, 0, 0, 0, 33, 0, 0];
        input.extend_from_slice(b"\x0e\x00FCGI_MAX_CONNS\x0f\x00FCGI_MPXS_CONNS");

        let (_, parsed) = record(&input).unwrap();
        assert_eq!(parsed.content, Content::GetValues(vec![
            NameValuePair::new("FCGI_MAX_CONNS", ""),
            NameValuePair::new("FCGI_MPXS_CONNS", "")
        ]));
    }
}
