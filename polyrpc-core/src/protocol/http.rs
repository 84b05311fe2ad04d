//! HTTP/1.1 codec: JSON or protobuf bodies framed by HTTP rules.
//!
//! The path is `/<service>/<method>`; `content-type` selects the body
//! encoding. Vendor headers carry what binary meta carries elsewhere:
//! `log-id` (correlation), `compress-type` (numeric code),
//! `attachment-size` (trailing bytes of the body that are the binary
//! attachment) and, on errors, `error-code`.
//!
//! Responses are written in completion order, not pipeline order; `log-id`
//! correlates them.

use bytes::{BufMut, Bytes, BytesMut};
use http::StatusCode;

use crate::buffer::BufferStore;
use crate::compress::CompressType;
use crate::error::{DecodeError, RpcError};
use crate::packet::{RawPacket, RequestPacket, ResponsePacket, WireEncoding};
use crate::protocol::{ConnContext, ProtocolCodec, ProtocolId};

pub const HDR_LOG_ID: &str = "log-id";
pub const HDR_COMPRESS_TYPE: &str = "compress-type";
pub const HDR_ATTACHMENT_SIZE: &str = "attachment-size";
pub const HDR_ERROR_CODE: &str = "error-code";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_PROTO: &str = "application/proto";

/// Heads larger than this cannot be legitimate traffic.
const MAX_HEAD_SIZE: usize = 64 * 1024;

const MAX_HEADERS: usize = 64;

pub struct HttpCodec;

/// How the body length was declared.
enum BodyFraming {
    Fixed(usize),
    Chunked,
}

fn body_framing(
    headers: &[httparse::Header<'_>],
    max_body_size: u64,
) -> Result<BodyFraming, DecodeError> {
    for h in headers {
        if h.name.eq_ignore_ascii_case("content-length") {
            let text = std::str::from_utf8(h.value).map_err(|_| DecodeError::BadSchema)?;
            let len: u64 = text.trim().parse().map_err(|_| DecodeError::BadSchema)?;
            if len > max_body_size {
                return Err(DecodeError::TooBigData);
            }
            return Ok(BodyFraming::Fixed(len as usize));
        }
        if h.name.eq_ignore_ascii_case("transfer-encoding")
            && h.value.eq_ignore_ascii_case(b"chunked")
        {
            return Ok(BodyFraming::Chunked);
        }
    }
    Ok(BodyFraming::Fixed(0))
}

/// Dechunk from `offset`. Returns the assembled body and total bytes
/// consumed from `offset`, or `NotEnoughData` while chunks are incomplete.
fn decode_chunked(
    view: &[u8],
    offset: usize,
    max_body_size: u64,
) -> Result<(Bytes, usize), DecodeError> {
    let mut cursor = offset;
    let mut body = BytesMut::new();
    loop {
        let line_end = find_crlf(view, cursor).ok_or(DecodeError::NotEnoughData)?;
        let size_text =
            std::str::from_utf8(&view[cursor..line_end]).map_err(|_| DecodeError::BadSchema)?;
        // Chunk extensions after ';' are ignored.
        let size_text = size_text.split(';').next().unwrap_or("").trim();
        let size =
            usize::from_str_radix(size_text, 16).map_err(|_| DecodeError::BadSchema)?;
        if body.len() as u64 + size as u64 > max_body_size {
            return Err(DecodeError::TooBigData);
        }
        cursor = line_end + 2;

        if size == 0 {
            // Last chunk; trailers are not supported, expect the final CRLF.
            if view.len() < cursor + 2 {
                return Err(DecodeError::NotEnoughData);
            }
            if &view[cursor..cursor + 2] != b"\r\n" {
                return Err(DecodeError::BadSchema);
            }
            return Ok((body.freeze(), cursor + 2 - offset));
        }

        if view.len() < cursor + size + 2 {
            return Err(DecodeError::NotEnoughData);
        }
        body.put_slice(&view[cursor..cursor + size]);
        if &view[cursor + size..cursor + size + 2] != b"\r\n" {
            return Err(DecodeError::BadSchema);
        }
        cursor += size + 2;
    }
}

fn find_crlf(view: &[u8], from: usize) -> Option<usize> {
    view.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}

fn header_value<'a>(headers: &'a [httparse::Header<'_>], name: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value)
}

fn header_u64(headers: &[httparse::Header<'_>], name: &str) -> Option<u64> {
    std::str::from_utf8(header_value(headers, name)?)
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn encoding_from_content_type(ct: Option<&[u8]>) -> Result<WireEncoding, RpcError> {
    let Some(ct) = ct else {
        return Err(RpcError::serialization("missing content-type"));
    };
    let text = std::str::from_utf8(ct)
        .map_err(|_| RpcError::serialization("content-type is not utf-8"))?;
    if text.starts_with(CONTENT_TYPE_JSON) {
        Ok(WireEncoding::Json)
    } else if text.starts_with(CONTENT_TYPE_PROTO) || text.starts_with("application/x-protobuf") {
        Ok(WireEncoding::Protobuf)
    } else {
        Err(RpcError::serialization(format!(
            "unsupported content-type {text:?}"
        )))
    }
}

fn content_type_for(encoding: WireEncoding) -> &'static str {
    match encoding {
        WireEncoding::Json => CONTENT_TYPE_JSON,
        WireEncoding::Protobuf => CONTENT_TYPE_PROTO,
    }
}

/// Split the trailing `attachment-size` bytes off the body.
fn split_attachment(
    body: Bytes,
    attachment_size: Option<u64>,
) -> Result<(Bytes, Option<Bytes>), RpcError> {
    let Some(att) = attachment_size else {
        return Ok((body, None));
    };
    let att = att as usize;
    if att == 0 {
        return Ok((body, None));
    }
    if att > body.len() {
        return Err(RpcError::serialization(format!(
            "attachment size {att} exceeds body size {}",
            body.len()
        )));
    }
    let message = body.slice(..body.len() - att);
    let attachment = body.slice(body.len() - att..);
    Ok((message, Some(attachment)))
}

impl HttpCodec {
    /// Cut one message (request or response) off the accumulator. The raw
    /// packet's meta is the head bytes; `decode_request` /
    /// `decode_response` re-parse them, which is cheap and keeps the shared
    /// `{meta, body}` shape.
    fn decode_message(
        &self,
        acc: &mut BufferStore,
        max_body_size: u64,
    ) -> Result<RawPacket, DecodeError> {
        let readable = acc.readable_bytes();
        if readable == 0 {
            return Err(DecodeError::NotEnoughData);
        }
        let view = acc.peek(readable)?;

        let mut req_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut req_headers);
        let head = match req.parse(&view) {
            Ok(httparse::Status::Complete(head_len)) => {
                Some((head_len, body_framing(req.headers, max_body_size)?))
            }
            Ok(httparse::Status::Partial) => None,
            Err(_) => {
                // Not a request line; maybe a response (client side).
                let mut resp_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
                let mut resp = httparse::Response::new(&mut resp_headers);
                match resp.parse(&view) {
                    Ok(httparse::Status::Complete(head_len)) => {
                        Some((head_len, body_framing(resp.headers, max_body_size)?))
                    }
                    Ok(httparse::Status::Partial) => None,
                    Err(_) => return Err(DecodeError::BadSchema),
                }
            }
        };

        let Some((head_len, framing)) = head else {
            // A valid prefix of an HTTP head; bail out once it stops being
            // plausibly a head at all.
            if readable > MAX_HEAD_SIZE {
                return Err(DecodeError::BadSchema);
            }
            return Err(DecodeError::NotEnoughData);
        };

        match framing {
            BodyFraming::Fixed(len) => {
                if readable < head_len + len {
                    return Err(DecodeError::NotEnoughData);
                }
                let meta = acc.retained_slice(0, head_len)?;
                let body = acc.retained_slice(head_len, len)?;
                acc.skip(head_len + len)?;
                Ok(RawPacket {
                    meta,
                    body,
                    push: None,
                })
            }
            BodyFraming::Chunked => {
                let (body, consumed) = decode_chunked(&view, head_len, max_body_size)?;
                let meta = acc.retained_slice(0, head_len)?;
                acc.skip(head_len + consumed)?;
                Ok(RawPacket {
                    meta,
                    body,
                    push: None,
                })
            }
        }
    }
}

impl ProtocolCodec for HttpCodec {
    fn id(&self) -> ProtocolId {
        ProtocolId::Http
    }

    fn decode(
        &self,
        acc: &mut BufferStore,
        ctx: &mut ConnContext,
    ) -> Result<RawPacket, DecodeError> {
        self.decode_message(acc, ctx.max_body_size)
    }

    fn decode_request(&self, raw: RawPacket, req: &mut RequestPacket) -> Result<(), RpcError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut head = httparse::Request::new(&mut headers);
        match head.parse(&raw.meta[..]) {
            Ok(httparse::Status::Complete(_)) => {}
            _ => return Err(RpcError::serialization("http head is not a request")),
        }

        let path = head
            .path
            .ok_or_else(|| RpcError::serialization("http request has no path"))?;
        let path = path.split('?').next().unwrap_or(path);
        let mut parts = path.trim_start_matches('/').splitn(2, '/');
        let service = parts.next().unwrap_or("");
        let method = parts.next().unwrap_or("");
        if service.is_empty() || method.is_empty() {
            return Err(RpcError::serialization(format!(
                "http path {path:?} does not name /service/method"
            )));
        }

        req.service_name = service.to_string();
        req.method_key = method.to_string();
        req.encoding = encoding_from_content_type(header_value(head.headers, "content-type"))?;
        req.log_id = header_u64(head.headers, HDR_LOG_ID).unwrap_or(0);
        req.compress_type = match header_u64(head.headers, HDR_COMPRESS_TYPE) {
            Some(code) => CompressType::from_code(code as i32)?,
            None => CompressType::None,
        };

        let attachment_size = header_u64(head.headers, HDR_ATTACHMENT_SIZE);
        let (message, attachment) = split_attachment(raw.body, attachment_size)?;
        req.body = message;
        req.attachment = attachment;
        Ok(())
    }

    fn decode_response(
        &self,
        raw: RawPacket,
        _ctx: &mut ConnContext,
    ) -> Result<ResponsePacket, RpcError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut head = httparse::Response::new(&mut headers);
        match head.parse(&raw.meta[..]) {
            Ok(httparse::Status::Complete(_)) => {}
            _ => return Err(RpcError::serialization("http head is not a response")),
        }

        let status = StatusCode::from_u16(head.code.unwrap_or(0))
            .map_err(|_| RpcError::serialization("http response has no status"))?;
        let log_id = header_u64(head.headers, HDR_LOG_ID).unwrap_or(0);

        if status != StatusCode::OK {
            // A non-200 answer is a service exception carrying the body as
            // its message.
            let code = header_u64(head.headers, HDR_ERROR_CODE)
                .map(|c| c as i32)
                .unwrap_or(crate::error::BaiduRpcErrno::Http.code());
            let text = String::from_utf8_lossy(&raw.body).into_owned();
            return Ok(ResponsePacket::error(log_id, code, text));
        }

        let compress_type = match header_u64(head.headers, HDR_COMPRESS_TYPE) {
            Some(code) => CompressType::from_code(code as i32)?,
            None => CompressType::None,
        };
        let encoding = encoding_from_content_type(header_value(head.headers, "content-type"))?;
        let attachment_size = header_u64(head.headers, HDR_ATTACHMENT_SIZE);
        let (body, attachment) = split_attachment(raw.body, attachment_size)?;
        Ok(ResponsePacket {
            log_id,
            compress_type,
            encoding,
            error_code: 0,
            error_text: String::new(),
            body,
            attachment,
        })
    }

    fn encode_request(&self, req: &RequestPacket) -> Result<Bytes, RpcError> {
        let attachment_len = req.attachment.as_ref().map_or(0, |a| a.len());
        let mut out = BytesMut::with_capacity(256 + req.body.len() + attachment_len);
        out.put_slice(
            format!(
                "POST /{}/{} HTTP/1.1\r\n",
                req.service_name, req.method_key
            )
            .as_bytes(),
        );
        out.put_slice(format!("content-type: {}\r\n", content_type_for(req.encoding)).as_bytes());
        out.put_slice(format!("{HDR_LOG_ID}: {}\r\n", req.log_id).as_bytes());
        out.put_slice(
            format!("{HDR_COMPRESS_TYPE}: {}\r\n", req.compress_type.code()).as_bytes(),
        );
        if attachment_len > 0 {
            out.put_slice(format!("{HDR_ATTACHMENT_SIZE}: {attachment_len}\r\n").as_bytes());
        }
        out.put_slice(
            format!("content-length: {}\r\n\r\n", req.body.len() + attachment_len).as_bytes(),
        );
        out.put_slice(&req.body);
        if let Some(att) = &req.attachment {
            out.put_slice(att);
        }
        Ok(out.freeze())
    }

    fn encode_response(&self, resp: &ResponsePacket) -> Result<Bytes, RpcError> {
        let mut out = BytesMut::with_capacity(256 + resp.body.len());
        if resp.is_success() {
            let attachment_len = resp.attachment.as_ref().map_or(0, |a| a.len());
            out.put_slice(b"HTTP/1.1 200 OK\r\n");
            out.put_slice(
                format!("content-type: {}\r\n", content_type_for(resp.encoding)).as_bytes(),
            );
            out.put_slice(format!("{HDR_LOG_ID}: {}\r\n", resp.log_id).as_bytes());
            out.put_slice(
                format!("{HDR_COMPRESS_TYPE}: {}\r\n", resp.compress_type.code()).as_bytes(),
            );
            if attachment_len > 0 {
                out.put_slice(format!("{HDR_ATTACHMENT_SIZE}: {attachment_len}\r\n").as_bytes());
            }
            out.put_slice(
                format!("content-length: {}\r\n\r\n", resp.body.len() + attachment_len)
                    .as_bytes(),
            );
            out.put_slice(&resp.body);
            if let Some(att) = &resp.attachment {
                out.put_slice(att);
            }
        } else {
            out.put_slice(b"HTTP/1.1 500 Internal Server Error\r\n");
            out.put_slice(b"content-type: text/plain\r\n");
            out.put_slice(format!("{HDR_LOG_ID}: {}\r\n", resp.log_id).as_bytes());
            out.put_slice(format!("{HDR_ERROR_CODE}: {}\r\n", resp.error_code).as_bytes());
            out.put_slice(
                format!("content-length: {}\r\n\r\n", resp.error_text.len()).as_bytes(),
            );
            out.put_slice(resp.error_text.as_bytes());
        }
        Ok(out.freeze())
    }
}
