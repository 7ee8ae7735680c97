use crate::error::{EventError, EventResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// 事件 `metadata` 的键值表示
pub type PayloadMap = serde_json::Map<String, Value>;

/// 类型化事件负载需要满足的通用能力边界
///
/// 通常由 `#[domain_event]` 宏为枚举生成实现：每个变体对应一个稳定的事件类型，
/// 变体字段逐一扁平化进 `metadata`。
pub trait EventPayload:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// 事件类型（形如 `booking.created` 或默认的 `BookingEvent.Created`）
    fn event_type(&self) -> &'static str;

    /// 该负载可能产生的全部事件类型
    fn event_types() -> &'static [&'static str];

    /// 聚合类型
    fn aggregate_type() -> Option<&'static str>;

    /// 聚合 ID
    fn aggregate_id(&self) -> Option<String>;

    /// 将字段扁平化为 `metadata`
    fn to_metadata(&self) -> EventResult<PayloadMap>;

    /// 依据事件类型从 `metadata` 还原负载
    fn from_metadata(event_type: &str, metadata: &PayloadMap) -> EventResult<Self>;
}

/// 写入单个字段
pub fn encode_field<T: Serialize + ?Sized>(
    map: &mut PayloadMap,
    key: &str,
    value: &T,
) -> EventResult<()> {
    map.insert(key.to_string(), serde_json::to_value(value)?);
    Ok(())
}

/// 读取单个字段；缺失字段按 `null` 处理，因此 `Option<T>` 字段可以省略
pub fn decode_field<T: DeserializeOwned>(map: &PayloadMap, key: &str) -> EventResult<T> {
    let value = map.get(key).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|err| EventError::Parse {
        reason: format!("field `{key}`: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_field_treats_missing_as_null() {
        let mut map = PayloadMap::new();
        encode_field(&mut map, "amount", &120_u64).unwrap();

        let amount: u64 = decode_field(&map, "amount").unwrap();
        let note: Option<String> = decode_field(&map, "note").unwrap();
        assert_eq!(amount, 120);
        assert_eq!(note, None);
        assert_eq!(map.get("amount"), Some(&json!(120)));
    }

    #[test]
    fn decode_field_reports_field_name() {
        let map = PayloadMap::new();
        let err = decode_field::<u64>(&map, "amount").unwrap_err();

        assert!(matches!(err, EventError::Parse { reason } if reason.starts_with("field `amount`")));
    }
}
