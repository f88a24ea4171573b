use core::str::FromStr;

use crate::IdResult;

/// The id-generation capability shared by every mode.
///
/// Implementations never panic or return errors on the request path: every
/// outcome is an [`IdResult`].
pub trait IdGen: Send + Sync {
    /// Prepares the generator. Returns `false` if it could not load its
    /// initial state; implementations may still recover later.
    fn init(&self) -> impl Future<Output = bool> + Send;

    /// Issues the next id for `tag`.
    fn get(&self, tag: &str) -> impl Future<Output = IdResult> + Send;
}

/// A generator that always succeeds with id `0`.
///
/// Stands in for a disabled mode so that callers still get a well-formed
/// answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroIdGen;

impl IdGen for ZeroIdGen {
    async fn init(&self) -> bool {
        true
    }

    async fn get(&self, _tag: &str) -> IdResult {
        IdResult::success(0)
    }
}

/// Which generator a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Segment,
    Snowflake,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "segment" => Ok(Self::Segment),
            "snowflake" => Ok(Self::Snowflake),
            other => Err(format!("unknown mode `{other}`")),
        }
    }
}

/// The uniform request entry point: dispatches to the segment or the
/// snowflake generator by [`Mode`].
///
/// A mode configured as `None` answers through [`ZeroIdGen`].
///
/// # Example
///
/// ```
/// use leafid::{IdGenService, IdResult, Mode, ZeroIdGen};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let service: IdGenService<ZeroIdGen, ZeroIdGen> = IdGenService::new(None, None);
/// assert!(service.init().await);
/// assert_eq!(service.get(Mode::Snowflake, "any").await, IdResult::success(0));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct IdGenService<A, B> {
    segment: Option<A>,
    snowflake: Option<B>,
}

impl<A, B> IdGenService<A, B>
where
    A: IdGen,
    B: IdGen,
{
    pub const fn new(segment: Option<A>, snowflake: Option<B>) -> Self {
        Self { segment, snowflake }
    }

    /// Initializes every configured generator; `true` only if all of them
    /// succeeded.
    pub async fn init(&self) -> bool {
        let segment = match &self.segment {
            Some(segment) => segment.init().await,
            None => true,
        };
        let snowflake = match &self.snowflake {
            Some(snowflake) => snowflake.init().await,
            None => true,
        };
        #[cfg(feature = "tracing")]
        tracing::info!(
            segment_enabled = self.segment.is_some(),
            snowflake_enabled = self.snowflake.is_some(),
            segment,
            snowflake,
            "id service initialized"
        );
        segment && snowflake
    }

    pub async fn get(&self, mode: Mode, tag: &str) -> IdResult {
        match mode {
            Mode::Segment => match &self.segment {
                Some(segment) => segment.get(tag).await,
                None => ZeroIdGen.get(tag).await,
            },
            Mode::Snowflake => match &self.snowflake {
                Some(snowflake) => snowflake.get(tag).await,
                None => ZeroIdGen.get(tag).await,
            },
        }
    }

    pub const fn segment(&self) -> Option<&A> {
        self.segment.as_ref()
    }

    pub const fn snowflake(&self) -> Option<&B> {
        self.snowflake.as_ref()
    }
}
