//! Serialization of FastCGI messages

use crate::errors::{Error, SerializationError, Result};
use crate::fastcgi::{Role, flags, record_kind, MAX_CONTENT_LENGTH, VERSION_1};

use byteorder::{BigEndian, WriteBytesExt};

use std::io::Write;

/// Writes a header from its bits
///
/// If succesful, returns the number of bytes of padding we told the other end
/// of the connection we were going to write.
fn write_header<W: Write>(output: &mut W, kind: u8, id: u16,
                          content_length: usize)
                          -> Result<u8>
{
    if content_length > MAX_CONTENT_LENGTH {
        return Err(Error::Serialization(SerializationError::TooLong));
    }

    let padding_length = if content_length % 8 == 0 {
        0
    }
    else {
        8 - content_length % 8
    };

    output.write_all(&[VERSION_1, kind])?;
    output.write_u16::<BigEndian>(id)?;
    output.write_u16::<BigEndian>(content_length as u16)?;
    output.write_u8(padding_length as u8)?;
    output.write_u8(0)?; // reserved byte

    Ok(padding_length as u8)
}

/// Writes a whole record: header, content and padding
fn write_record<W: Write>(output: &mut W, kind: u8, id: u16, content: &[u8])
                          -> Result<()>
{
    let padding_length = write_header(output, kind, id, content.len())?;
    output.write_all(content)?;
    output.write_all(&[0; 8][..padding_length as usize])?;

    Ok(())
}

/// Writes one frame of a stream, split over as many records as it takes
///
/// Empty content produces the single empty record that ends the stream.
fn write_stream<W: Write>(output: &mut W, kind: u8, id: u16, content: &[u8])
                          -> Result<()>
{
    if content.is_empty() {
        return write_record(output, kind, id, content);
    }

    for piece in content.chunks(MAX_CONTENT_LENGTH) {
        write_record(output, kind, id, piece)?;
    }

    Ok(())
}

/// Computes the number of bytes a name or value will take up on the wire once
/// serialized into the FastCGI name-value pair format
fn name_length(val: &[u8]) -> usize {
    let length = val.len();
    let length_length = if length > 127 { 4 } else { 1 };

    length + length_length
}

fn write_length<W: Write>(output: &mut W, length: usize) -> Result<()> {
    if length > 0x7fff_ffff {
        return Err(Error::Serialization(SerializationError::TooLong));
    }

    if length > 127 {
        output.write_u32::<BigEndian>(length as u32 | 0x8000_0000)?;
    }
    else {
        output.write_u8(length as u8)?;
    }

    Ok(())
}

/// Writes a name-value pair to the stream
fn write_name_val_pair<W: Write>(output: &mut W, name: &[u8], val: &[u8])
                                 -> Result<()>
{
    write_length(output, name.len())?;
    write_length(output, val.len())?;
    output.write_all(name)?;
    output.write_all(val)?;

    Ok(())
}

fn encode_pairs(pairs: &[(&[u8], &[u8])]) -> Result<Vec<u8>> {
    let content_length = pairs.iter()
        .map(|&(name, value)| name_length(name) + name_length(value))
        .sum();

    let mut content = Vec::with_capacity(content_length);
    for &(name, value) in pairs {
        write_name_val_pair(&mut content, name, value)?;
    }

    Ok(content)
}

/// Writes a `GetValues` record to the output stream
pub fn get_values<W: Write>(mut output: W, get_for: &[&[u8]]) -> Result<()> {
    let pairs: Vec<(&[u8], &[u8])> = get_for.iter()
        .map(|&name| (name, &b""[..]))
        .collect();

    let content = encode_pairs(&pairs)?;
    write_record(&mut output, record_kind::GET_VALUES, 0, &content)
}

/// Writes the answer to a `GetValues` record
pub fn get_values_result<W: Write>(mut output: W, values: &[(&[u8], &[u8])])
                                   -> Result<()>
{
    let content = encode_pairs(values)?;
    write_record(&mut output, record_kind::GET_VALUES_RESULT, 0, &content)
}

/// Tells the web server we don't understand records of type `kind`
pub fn unknown_type<W: Write>(mut output: W, kind: u8) -> Result<()> {
    write_record(&mut output, record_kind::UNKNOWN_TYPE, 0,
                 &[kind, 0, 0, 0, 0, 0, 0, 0])
}

/// Write a `BeginRequest` message
pub fn begin_request<W: Write>(mut output: W, id: u16, role: Role, keep_conn: bool)
                               -> Result<()>
{
    let mut content = [0; 8];
    {
        let mut cursor = &mut content[..];
        cursor.write_u16::<BigEndian>(role.to_protocol_number())?;
        cursor.write_u8(if keep_conn { flags::KEEP_CONN } else { 0 })?;
    }

    write_record(&mut output, record_kind::BEGIN_REQUEST, id, &content)
}

/// Write a `BeginRequest` message for a Responder with `FCGI_KEEP_CONN` set
pub fn start_request<W: Write>(output: W, id: u16) -> Result<()> {
    begin_request(output, id, Role::Responder, true)
}

/// Write a stream of parameters
///
/// This will automatically emit the stream-terminating empty message as well.
pub fn params<W: Write>(mut output: W, id: u16, params: &[(&[u8], &[u8])])
                        -> Result<()> {
    let content = encode_pairs(params)?;
    if !content.is_empty() {
        write_stream(&mut output, record_kind::PARAMS, id, &content)?;
    }

    write_record(&mut output, record_kind::PARAMS, id, &[])
}

/// Write a frame of a FCGI_STDIN stream
pub fn stdin<W: Write>(mut output: W, id: u16, content: &[u8]) -> Result<()> {
    write_stream(&mut output, record_kind::STDIN, id, content)
}

/// Write a frame of a FCGI_STDOUT stream; empty content ends the stream
pub fn stdout<W: Write>(mut output: W, id: u16, content: &[u8]) -> Result<()> {
    write_stream(&mut output, record_kind::STDOUT, id, content)
}

pub fn stderr<W: Write>(mut output: W, id: u16, content: &[u8]) -> Result<()> {
    write_stream(&mut output, record_kind::STDERR, id, content)
}

pub fn abort_request<W: Write>(mut output: W, id: u16) -> Result<()> {
    write_record(&mut output, record_kind::ABORT_REQUEST, id, &[])
}

/// Write the `EndRequest` record that finishes request `id`
pub fn end_request<W: Write>(mut output: W, id: u16, app_status: u32,
                             protocol_status: u8)
                             -> Result<()>
{
    let mut content = [0; 8];
    {
        let mut cursor = &mut content[..];
        cursor.write_u32::<BigEndian>(app_status)?;
        cursor.write_u8(protocol_status)?;
    }

    write_record(&mut output, record_kind::END_REQUEST, id, &content)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fastcgi::parser::record;
    use crate::fastcgi::{BeginRequest, Content, EndRequest, NameValuePair,
                         protocol_status};

    fn parse_all(mut input: &[u8]) -> Vec<Content> {
        let mut contents = Vec::new();
        while !input.is_empty() {
            let (rest, parsed) = record(input).unwrap();
            contents.push(parsed.content);
            input = rest;
        }
        contents
    }

    #[test]
    fn header_pads_to_eight() {
        let mut output = Vec::new();
        stdin(&mut output, 1, b"abc").unwrap();

        assert_eq!(output, vec![1, 5, 0, 1, 0, 3, 5, 0,
                                b'a', b'b', b'c', 0, 0, 0, 0, 0]);
    }

    #[test]
    fn start_request_bytes() {
        let mut output = Vec::new();
        start_request(&mut output, 258).unwrap();

        assert_eq!(output, vec![1, 1, 1, 2, 0, 8, 0, 0,
                                0, 1, 1, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn begin_request_without_keep_conn() {
        let mut output = Vec::new();
        begin_request(&mut output, 1, Role::Authorizer, false).unwrap();

        assert_eq!(parse_all(&output), vec![
            Content::BeginRequest(BeginRequest { role: Role::Authorizer, flags: 0 })
        ]);
    }

    #[test]
    fn params_end_with_empty_record() {
        let mut output = Vec::new();
        params(&mut output, 1, &[(&b"SERVER_PORT"[..], &b"80"[..])]).unwrap();

        let contents = parse_all(&output);
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0], Content::Params(b"\x0b\x02SERVER_PORT80".to_vec()));
        assert_eq!(contents[1], Content::Params(Vec::new()));
    }

    #[test]
    fn long_value_lengths_set_top_bit() {
        let value = vec![b'v'; 200];
        let mut output = Vec::new();
        params(&mut output, 1, &[(&b"X"[..], &value[..])]).unwrap();

        assert_eq!(&output[8..14], &[1, 0x80, 0, 0, 200, b'X']);
    }

    #[test]
    fn large_stream_is_split() {
        let content = vec![7u8; MAX_CONTENT_LENGTH + 10];
        let mut output = Vec::new();
        stdout(&mut output, 3, &content).unwrap();

        let contents = parse_all(&output);
        assert_eq!(contents.len(), 2);
        match (&contents[0], &contents[1]) {
            (&Content::Stdout(ref first), &Content::Stdout(ref second)) => {
                assert_eq!(first.len(), MAX_CONTENT_LENGTH);
                assert_eq!(second.len(), 10);
            },
            other => panic!("unexpected records {:?}", other)
        }
    }

    #[test]
    fn empty_stdout_ends_stream() {
        let mut output = Vec::new();
        stdout(&mut output, 3, b"").unwrap();

        assert_eq!(output, vec![1, 6, 0, 3, 0, 0, 0, 0]);
    }

    #[test]
    fn end_request_fields() {
        let mut output = Vec::new();
        end_request(&mut output, 4, 1, protocol_status::UNKNOWN_ROLE).unwrap();

        assert_eq!(parse_all(&output), vec![
            Content::EndRequest(EndRequest {
                app_status: 1,
                protocol_status: protocol_status::UNKNOWN_ROLE
            })
        ]);
    }

    #[test]
    fn management_records() {
        let mut output = Vec::new();
        get_values(&mut output, &[&b"FCGI_MAX_CONNS"[..]]).unwrap();
        get_values_result(&mut output, &[(&b"FCGI_MPXS_CONNS"[..], &b"1"[..])]).unwrap();
        unknown_type(&mut output, 42).unwrap();

        assert_eq!(parse_all(&output), vec![
            Content::GetValues(vec![NameValuePair::new("FCGI_MAX_CONNS", "")]),
            Content::GetValuesResult(vec![NameValuePair::new("FCGI_MPXS_CONNS", "1")]),
            Content::UnknownType(crate::fastcgi::UnknownType(42))
        ]);
    }

    #[test]
    fn oversized_record_is_refused() {
        let content = vec![0u8; MAX_CONTENT_LENGTH + 1];
        let mut output = Vec::new();

        match write_record(&mut output, record_kind::STDOUT, 1, &content) {
            Err(Error::Serialization(SerializationError::TooLong)) => (),
            other => panic!("expected TooLong, got {:?}", other)
        }
        assert!(output.is_empty());
    }
}
