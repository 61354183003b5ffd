use std::fmt;
use thiserror::Error;

/// 组件回调返回的错误类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `Group::wait` 的结果：`Ok(())` 表示启动、等待、关闭全部正常完成
pub type Outcome = Result<(), JoinedError>;

/// 生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Stop,
}

/// 单个失败
#[derive(Debug, Error)]
pub enum GroupError {
    /// 启动阶段超时
    #[error("start context deadline exceeded")]
    StartTimeout,

    /// 关闭阶段超时
    #[error("stop context deadline exceeded")]
    StopTimeout,

    /// 初始化函数返回的错误
    #[error("{0}")]
    Start(#[source] BoxError),

    /// 关闭函数返回的错误
    #[error("{0}")]
    Stop(#[source] BoxError),
}

impl GroupError {
    pub fn is_start_timeout(&self) -> bool {
        matches!(self, GroupError::StartTimeout)
    }

    pub fn is_stop_timeout(&self) -> bool {
        matches!(self, GroupError::StopTimeout)
    }

    pub fn is_timeout(&self) -> bool {
        self.is_start_timeout() || self.is_stop_timeout()
    }

    /// 失败所属的阶段
    pub fn phase(&self) -> Phase {
        match self {
            GroupError::StartTimeout | GroupError::Start(_) => Phase::Start,
            GroupError::StopTimeout | GroupError::Stop(_) => Phase::Stop,
        }
    }

    /// 回调返回的原始错误（超时标记没有）
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            GroupError::Start(err) | GroupError::Stop(err) => Some(err.as_ref()),
            GroupError::StartTimeout | GroupError::StopTimeout => None,
        }
    }
}

/// 多个失败的组合
///
/// 至少包含一个错误；`Display` 按顺序每行输出一个错误。
#[derive(Debug)]
pub struct JoinedError {
    errors: Vec<GroupError>,
}

impl JoinedError {
    /// 合并错误序列，空序列返回 `None`
    pub fn join<I>(errors: I) -> Option<Self>
    where
        I: IntoIterator<Item = GroupError>,
    {
        let errors: Vec<GroupError> = errors.into_iter().collect();
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn errors(&self) -> &[GroupError] {
        &self.errors
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GroupError> {
        self.errors.iter()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// 组合错误至少包含一个错误，恒为 `false`
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<GroupError> {
        self.errors
    }

    pub fn contains<P>(&self, predicate: P) -> bool
    where
        P: FnMut(&GroupError) -> bool,
    {
        self.errors.iter().any(predicate)
    }

    pub fn has_start_timeout(&self) -> bool {
        self.contains(GroupError::is_start_timeout)
    }

    pub fn has_stop_timeout(&self) -> bool {
        self.contains(GroupError::is_stop_timeout)
    }
}

impl fmt::Display for JoinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for JoinedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl IntoIterator for JoinedError {
    type Item = GroupError;
    type IntoIter = std::vec::IntoIter<GroupError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a> IntoIterator for &'a JoinedError {
    type Item = &'a GroupError;
    type IntoIter = std::slice::Iter<'a, GroupError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

/// 把前置错误和关闭阶段的结果拼接成一个结果（前置错误在前）
pub fn join_outcomes(head: Vec<GroupError>, stop: Outcome) -> Outcome {
    let tail = match stop {
        Ok(()) => Vec::new(),
        Err(joined) => joined.into_errors(),
    };

    match JoinedError::join(head.into_iter().chain(tail)) {
        Some(joined) => Err(joined),
        None => Ok(()),
    }
}
