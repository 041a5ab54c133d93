use std::fmt;
use std::time::Duration;

/// 记忆子系统的统一错误类型
#[derive(Debug)]
pub enum MemoryError {
    /// LLM（重要性判定 / 摘要）相关错误
    Llm(LlmError),
    /// 向量化服务错误
    Embedding(EmbeddingError),
    /// 向量数据库错误
    VectorDb(VectorDbError),
    /// 熔断器处于打开状态，调用被直接拒绝
    CircuitOpen(CircuitBreakerOpen),
    /// 输入校验失败（不重试，也不计入熔断阈值）
    Validation(ValidationError),
    /// 配置错误
    Config(ConfigError),
    /// 解析错误
    Parse(ParseError),
    /// IO 错误
    Io(std::io::Error),
    /// 其他错误
    Other(String),
}

/// LLM 相关错误
#[derive(Debug)]
pub enum LlmError {
    /// 网络请求失败
    NetworkError(String),
    /// API 返回错误状态码
    ApiError { status: u16, message: String },
    /// 响应格式无效
    InvalidResponse(String),
    /// 没有返回内容
    EmptyResponse,
}

/// 向量化服务错误
#[derive(Debug)]
pub enum EmbeddingError {
    NetworkError(String),
    ApiError { status: u16, message: String },
    InvalidResponse(String),
}

/// 向量数据库错误
#[derive(Debug)]
pub enum VectorDbError {
    NetworkError(String),
    ApiError { status: u16, message: String },
    InvalidResponse(String),
    /// 集合已存在（并发创建时出现，不算故障）
    AlreadyExists(String),
    /// 集合尚未创建
    CollectionNotFound(String),
}

/// 熔断器拒绝调用时返回的错误
#[derive(Debug, Clone)]
pub struct CircuitBreakerOpen {
    /// 熔断器名称（对应的外部服务）
    pub name: String,
    /// 距离允许试探调用的剩余时间
    pub retry_after: Duration,
}

/// 输入校验错误
#[derive(Debug)]
pub enum ValidationError {
    /// 文本为空
    EmptyText(&'static str),
    /// 参数值无效
    InvalidArgument { name: String, message: String },
}

/// 解析错误
#[derive(Debug)]
pub enum ParseError {
    /// JSON 解析错误
    JsonError(String),
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 配置值无效
    InvalidValue { field: String, message: String },
    /// 环境变量格式错误
    EnvFormatError(String),
    /// 未知的模型配置项
    UnMatchConfigError(String, String),
    /// 模型缺少必要配置项
    MissingConfig(String, String),
    /// 找不到指定模型
    NotFindModelError(String),
}

impl MemoryError {
    /// 是否属于外部服务故障（计入熔断器失败次数）
    ///
    /// 校验、配置、解析错误以及熔断器自身的拒绝都不算服务故障；
    /// 集合已存在 / 不存在属于正常的生命周期信号。
    pub fn is_service_failure(&self) -> bool {
        match self {
            MemoryError::Llm(_) | MemoryError::Embedding(_) => true,
            MemoryError::VectorDb(VectorDbError::AlreadyExists(_))
            | MemoryError::VectorDb(VectorDbError::CollectionNotFound(_)) => false,
            MemoryError::VectorDb(_) => true,
            _ => false,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, MemoryError::CircuitOpen(_))
    }

    pub fn empty_text(what: &'static str) -> Self {
        MemoryError::Validation(ValidationError::EmptyText(what))
    }
}

// 实现 Display trait
impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::Llm(e) => write!(f, "LLM Error: {}", e),
            MemoryError::Embedding(e) => write!(f, "Embedding Error: {}", e),
            MemoryError::VectorDb(e) => write!(f, "Vector DB Error: {}", e),
            MemoryError::CircuitOpen(e) => write!(f, "{}", e),
            MemoryError::Validation(e) => write!(f, "Validation Error: {}", e),
            MemoryError::Config(e) => write!(f, "Config Error: {}", e),
            MemoryError::Parse(e) => write!(f, "Parse Error: {}", e),
            MemoryError::Io(e) => write!(f, "IO Error: {}", e),
            MemoryError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            LlmError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            LlmError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            LlmError::EmptyResponse => write!(f, "Empty response from LLM"),
        }
    }
}

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            EmbeddingError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            EmbeddingError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl fmt::Display for VectorDbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorDbError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            VectorDbError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            VectorDbError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            VectorDbError::AlreadyExists(name) => {
                write!(f, "Collection '{}' already exists", name)
            }
            VectorDbError::CollectionNotFound(name) => {
                write!(f, "Collection '{}' not found", name)
            }
        }
    }
}

impl fmt::Display for CircuitBreakerOpen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Circuit breaker '{}' is open, retry in {:.1}s",
            self.name,
            self.retry_after.as_secs_f64()
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyText(what) => write!(f, "{} must not be empty", what),
            ValidationError::InvalidArgument { name, message } => {
                write!(f, "Invalid argument '{}': {}", name, message)
            }
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::JsonError(msg) => write!(f, "JSON parse error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
            ConfigError::EnvFormatError(key) => {
                write!(f, "Malformed environment variable: {}", key)
            }
            ConfigError::UnMatchConfigError(config_key, key) => {
                write!(f, "Unknown config key '{}' in {}", config_key, key)
            }
            ConfigError::MissingConfig(model_id, field) => {
                write!(f, "Model '{}' is missing '{}'", model_id, field)
            }
            ConfigError::NotFindModelError(model) => write!(f, "Model not configured: {}", model),
        }
    }
}

// 实现 std::error::Error trait
impl std::error::Error for MemoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MemoryError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for LlmError {}
impl std::error::Error for EmbeddingError {}
impl std::error::Error for VectorDbError {}
impl std::error::Error for CircuitBreakerOpen {}
impl std::error::Error for ValidationError {}
impl std::error::Error for ParseError {}
impl std::error::Error for ConfigError {}

/// 把 reqwest 错误整理成可读的网络错误描述（区分超时与连接失败）
pub(crate) fn describe_reqwest(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "Request timeout".to_string()
    } else if err.is_connect() {
        format!("Connection failed: {}", err)
    } else {
        err.to_string()
    }
}

// From 转换实现
impl From<std::io::Error> for MemoryError {
    fn from(err: std::io::Error) -> Self {
        MemoryError::Io(err)
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Parse(ParseError::JsonError(err.to_string()))
    }
}

impl From<serde_yaml::Error> for MemoryError {
    fn from(err: serde_yaml::Error) -> Self {
        MemoryError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<LlmError> for MemoryError {
    fn from(err: LlmError) -> Self {
        MemoryError::Llm(err)
    }
}

impl From<EmbeddingError> for MemoryError {
    fn from(err: EmbeddingError) -> Self {
        MemoryError::Embedding(err)
    }
}

impl From<VectorDbError> for MemoryError {
    fn from(err: VectorDbError) -> Self {
        MemoryError::VectorDb(err)
    }
}

impl From<CircuitBreakerOpen> for MemoryError {
    fn from(err: CircuitBreakerOpen) -> Self {
        MemoryError::CircuitOpen(err)
    }
}

impl From<ValidationError> for MemoryError {
    fn from(err: ValidationError) -> Self {
        MemoryError::Validation(err)
    }
}

impl From<ParseError> for MemoryError {
    fn from(err: ParseError) -> Self {
        MemoryError::Parse(err)
    }
}

impl From<ConfigError> for MemoryError {
    fn from(err: ConfigError) -> Self {
        MemoryError::Config(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_failure_classification() {
        assert!(MemoryError::Llm(LlmError::EmptyResponse).is_service_failure());
        assert!(
            MemoryError::VectorDb(VectorDbError::NetworkError("down".into())).is_service_failure()
        );
        assert!(
            !MemoryError::VectorDb(VectorDbError::AlreadyExists("c".into())).is_service_failure()
        );
        assert!(!MemoryError::empty_text("text").is_service_failure());
        let open = MemoryError::CircuitOpen(CircuitBreakerOpen {
            name: "qdrant".into(),
            retry_after: Duration::from_secs(3),
        });
        assert!(!open.is_service_failure());
        assert!(open.is_circuit_open());
    }

    #[test]
    fn test_display_messages() {
        let err = MemoryError::empty_text("memory text");
        assert_eq!(err.to_string(), "Validation Error: memory text must not be empty");

        let err = MemoryError::CircuitOpen(CircuitBreakerOpen {
            name: "embedding".into(),
            retry_after: Duration::from_millis(1500),
        });
        assert_eq!(
            err.to_string(),
            "Circuit breaker 'embedding' is open, retry in 1.5s"
        );
    }
}
