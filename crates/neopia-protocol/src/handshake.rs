//! 握手协议
//!
//! 主机发送纯文本 `"FF\r"`，设备应答一行逗号分隔字段：
//!
//! ```text
//! FF,<设备类型>,<型号>,<固件>,<12 位十六进制地址>[,...]
//! ```
//!
//! 至少需要 5 个字段。

use crate::{ModelCode, ProtocolError};

/// 握手请求
pub const HANDSHAKE_REQUEST: &[u8] = b"FF\r";

/// 握手应答前缀
pub const HANDSHAKE_PREFIX: &str = "FF";

/// 应答最少字段数
pub const HANDSHAKE_MIN_FIELDS: usize = 5;

/// 未知地址
pub const NULL_ADDRESS: &str = "000000000000";

/// 握手应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    fields: Vec<String>,
}

impl HandshakeInfo {
    /// 解析应答行
    ///
    /// # 错误
    ///
    /// 前缀不是 `FF` 或字段少于 5 个时返回 [`ProtocolError::InvalidHandshake`]。
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if !line.starts_with(HANDSHAKE_PREFIX) {
            return Err(ProtocolError::InvalidHandshake(format!(
                "missing {} prefix: {:?}",
                HANDSHAKE_PREFIX, line
            )));
        }
        let fields: Vec<String> = line.split(',').map(|f| f.trim().to_string()).collect();
        if fields.len() < HANDSHAKE_MIN_FIELDS {
            return Err(ProtocolError::InvalidHandshake(format!(
                "expected at least {} fields, got {}",
                HANDSHAKE_MIN_FIELDS,
                fields.len()
            )));
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// 设备类型（field[1]）
    pub fn device_type(&self) -> &str {
        &self.fields[1]
    }

    /// 型号（field[2]）
    pub fn model(&self) -> &str {
        &self.fields[2]
    }

    /// 对端地址（field[4]）
    pub fn address(&self) -> &str {
        &self.fields[4]
    }
}

impl ModelCode {
    /// Neosoco 控制器识别规则
    ///
    /// - 类型为 `Neosoco`（或旧名 `Hamster`）且型号 `04` → [`ModelCode::Gen04`]
    /// - 型号 `0E` → [`ModelCode::Gen0E`]（不限类型）
    pub fn from_handshake(info: &HandshakeInfo) -> Option<Self> {
        match (info.device_type(), info.model()) {
            ("Neosoco" | "Hamster", "04") => Some(Self::Gen04),
            (_, "0E") => Some(Self::Gen0E),
            _ => None,
        }
    }
}

/// 将 12 位十六进制地址格式化为 `aa:bb:cc:dd:ee:ff`（按字节倒序）
///
/// 地址过短或为全零时返回 `None`。
pub fn format_address(address: &str) -> Option<String> {
    if address.len() < 12 || address == NULL_ADDRESS || !address.is_ascii() {
        return None;
    }
    let pairs: Vec<&str> = (0..6).rev().map(|i| &address[i * 2..i * 2 + 2]).collect();
    Some(pairs.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let info = HandshakeInfo::parse("FF,Neosoco,04,1.0,A1B2C3D4E5F6\r\n").unwrap();
        assert_eq!(info.fields().len(), 5);
        assert_eq!(info.device_type(), "Neosoco");
        assert_eq!(info.model(), "04");
        assert_eq!(info.address(), "A1B2C3D4E5F6");
    }

    #[test]
    fn test_parse_rejects_short_or_unprefixed() {
        assert!(HandshakeInfo::parse("FF,Neosoco,04").is_err());
        assert!(HandshakeInfo::parse("AA,Neosoco,04,1,A1B2C3D4E5F6").is_err());
        assert!(HandshakeInfo::parse("").is_err());
    }

    #[test]
    fn test_model_code_rules() {
        let gen04 = HandshakeInfo::parse("FF,Neosoco,04,1,000000000001").unwrap();
        assert_eq!(ModelCode::from_handshake(&gen04), Some(ModelCode::Gen04));

        let legacy = HandshakeInfo::parse("FF,Hamster,04,1,000000000001").unwrap();
        assert_eq!(ModelCode::from_handshake(&legacy), Some(ModelCode::Gen04));

        let gen0e = HandshakeInfo::parse("FF,Other,0E,1,000000000001").unwrap();
        assert_eq!(ModelCode::from_handshake(&gen0e), Some(ModelCode::Gen0E));

        let unknown = HandshakeInfo::parse("FF,Other,04,1,000000000001").unwrap();
        assert_eq!(ModelCode::from_handshake(&unknown), None);
    }

    #[test]
    fn test_format_address_reversed_pairs() {
        assert_eq!(
            format_address("A1B2C3D4E5F6").as_deref(),
            Some("F6:E5:D4:C3:B2:A1")
        );
        assert_eq!(format_address(NULL_ADDRESS), None);
        assert_eq!(format_address("A1B2"), None);
    }
}
