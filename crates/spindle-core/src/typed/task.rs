//! Task trait - 型付き Task の定義

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task は task_type と型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct EmailDelivery {
///     to: String,
/// }
///
/// impl Task for EmailDelivery {
///     const TYPE: &'static str = "email:delivery";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: payload (JSON) との相互変換のため
/// - `Send + Sync + 'static`: Arc に格納してワーカー間で共有するため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// task_type の定義
    ///
    /// # 命名規約
    /// - `{domain}:{action}`
    /// - 例: `email:delivery`
    const TYPE: &'static str;
}
