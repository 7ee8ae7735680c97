use serde::Serialize;

/// 管理用例的返回值，可直接序列化给运维接口
pub trait Dto: Serialize + Send + Sync + 'static {}
