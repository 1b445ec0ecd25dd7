use encoding_rs::Encoding;
use html5ever::serialize::{serialize, SerializeOpts};
use markup5ever_rcdom::{Handle, SerializableHandle};

use crate::error::{AuditError, AuditResult};

/// 序列化文档，按需转换为原始编码
pub fn serialize_document(document: &Handle, document_encoding: &str) -> AuditResult<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();

    let serializable: SerializableHandle = document.clone().into();
    serialize(&mut buf, &serializable, SerializeOpts::default())
        .map_err(|e| AuditError::IoError(format!("DOM序列化失败: {}", e)))?;

    if !document_encoding.is_empty() {
        if let Some(encoding) = Encoding::for_label(document_encoding.as_bytes()) {
            let s: &str = &String::from_utf8_lossy(&buf);
            let (data, _, _) = encoding.encode(s);
            buf = data.to_vec();
        }
    }

    Ok(buf)
}

/// 序列化为 UTF-8 字符串
pub fn serialize_to_string(document: &Handle) -> AuditResult<String> {
    let bytes = serialize_document(document, "")?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
