use thiserror::Error;

/// 应用错误
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// 配置缺失或非法
    #[error("配置错误: {0}")]
    Config(String),

    /// 目标记录不存在
    #[error("数据不存在: {0}")]
    NotFound(String),

    /// 超过owner维度的数量上限
    #[error("超过配额限制: {0}")]
    QuotaExceeded(String),

    /// 同一owner+技能+标的已存在激活实例
    #[error("重复的激活实例: owner={owner_id}, skill={skill_code}, inst={inst_id}")]
    DuplicateInstance {
        owner_id: String,
        skill_code: String,
        inst_id: String,
    },

    /// 当前状态不允许该操作
    #[error("状态不允许该操作: 当前={current}, 允许={allowed}")]
    InvalidStatus { current: String, allowed: String },

    /// 参数不符合技能定义的schema
    #[error("参数校验失败: {0}")]
    InvalidParams(String),

    /// 凭证缺失、被拒绝或解密失败
    #[error("券商凭证无效: {0}")]
    CredentialInvalid(String),

    /// 券商正常应答但拒绝了请求
    #[error("券商拒绝请求: {0}")]
    BrokerRejected(String),

    /// 请求了券商不支持的能力，例如在模拟盘券商上实盘下单
    #[error("券商能力不支持: {0}")]
    CapabilityNotSupported(String),

    /// 风控技能拦截了下单
    #[error("风控拦截: {0}")]
    RiskBlocked(String),

    /// 行情服务返回了业务层面的失败，不可重试
    #[error("行情服务错误: {0}")]
    Market(String),

    /// 上游限流，可重试
    #[error("上游限流: {0}")]
    RateLimited(String),

    /// 上游超时或5xx，可重试
    #[error("上游暂时不可用: {0}")]
    Upstream(String),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    Db(String),

    /// 加解密失败
    #[error("加解密失败: {0}")]
    Cipher(String),
}

impl AppError {
    /// 只有限流和上游瞬时故障适合原样重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::RateLimited(_) | AppError::Upstream(_))
    }
}

impl From<rbatis::Error> for AppError {
    fn from(err: rbatis::Error) -> Self {
        AppError::Db(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    /// model层统一返回anyhow，到service层收敛成数据库错误
    fn from(err: anyhow::Error) -> Self {
        AppError::Db(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        // 传输层失败按可重试的上游故障处理，状态码语义由调用方自行映射
        AppError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Upstream(format!("应答解析失败: {}", err))
    }
}
