/// 配置管理模組
///
/// 本模組負責加載、驗證和管理閘道配置。
/// 配置來源為 `config/{環境}.toml`，並可用 `APIX__` 前綴的環境變數覆寫。
// 宣告子模組
pub mod loader;
pub mod manager;
pub mod types;
pub mod validation;

// 重新導出常用組件
pub use loader::{ConfigLoader, Environment};
pub use manager::{get_config, init_config};
pub use types::*;
pub use validation::{validate_config, ValidationError, ValidationUtils, Validator};
