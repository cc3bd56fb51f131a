//! Batch execution of one compiled sheet over many documents.
//!
//! A [`Processor`] is shared between workers; every document gets its own
//! transformer on whichever thread picks it up.
//!
//! ## Available Executors
//!
//! - [`RayonExecutor`]: Work-stealing thread pool (feature: `rayon`)
//! - [`SyncExecutor`]: Sequential execution
//!
//! ## Usage
//!
//! ```ignore
//! use strix_executor::{ExecutorImpl, transform_all};
//! use strix_stx::Processor;
//!
//! let processor = Processor::compile(sheet)?;
//! let outputs = transform_all(&ExecutorImpl::default(), &processor, documents);
//! ```

#[cfg(feature = "rayon")]
mod rayon_executor;
mod sync_executor;

#[cfg(feature = "rayon")]
pub use rayon_executor::RayonExecutor;
pub use sync_executor::SyncExecutor;

use strix_stx::{Processor, StxError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to build thread pool: {0}")]
    Pool(String),
}

/// Runs a function over a batch of items.
pub trait Executor {
    /// Results come back in the order of `items`.
    fn execute_all<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync;

    /// How many items may run at the same time.
    fn parallelism(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// A type-erased executor that wraps concrete executor implementations.
///
/// Since the `Executor` trait has generic methods, it cannot be used as a trait object
/// (`dyn Executor`). This enum holds the concrete executors and delegates to them.
#[derive(Clone, Debug)]
pub enum ExecutorImpl {
    /// Sequential executor (no parallelism)
    Sync(SyncExecutor),

    /// Rayon work-stealing thread pool executor
    #[cfg(feature = "rayon")]
    Rayon(RayonExecutor),
}

impl Executor for ExecutorImpl {
    fn execute_all<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        match self {
            ExecutorImpl::Sync(exec) => exec.execute_all(items, f),
            #[cfg(feature = "rayon")]
            ExecutorImpl::Rayon(exec) => exec.execute_all(items, f),
        }
    }

    fn parallelism(&self) -> usize {
        match self {
            ExecutorImpl::Sync(exec) => exec.parallelism(),
            #[cfg(feature = "rayon")]
            ExecutorImpl::Rayon(exec) => exec.parallelism(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ExecutorImpl::Sync(exec) => exec.name(),
            #[cfg(feature = "rayon")]
            ExecutorImpl::Rayon(exec) => exec.name(),
        }
    }
}

impl Default for ExecutorImpl {
    fn default() -> Self {
        #[cfg(feature = "rayon")]
        {
            ExecutorImpl::Rayon(RayonExecutor::new())
        }
        #[cfg(not(feature = "rayon"))]
        {
            ExecutorImpl::Sync(SyncExecutor::new())
        }
    }
}

/// Transforms every document with `processor`, serializing each result.
pub fn transform_all<E, D>(
    executor: &E,
    processor: &Processor,
    documents: Vec<D>,
) -> Vec<Result<String, StxError>>
where
    E: Executor,
    D: AsRef<str> + Send,
{
    log::debug!(
        "Transforming {} document(s) with the {} executor ({} worker(s))",
        documents.len(),
        executor.name(),
        executor.parallelism()
    );
    executor.execute_all(documents, |document| processor.transform_str(document.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NUMBERED: &str = r#"
        <stx:transform version="1.0" xmlns:stx="http://stx.sourceforge.net/2002/ns">
            <stx:variable name="seen" select="0"/>
            <stx:template match="row">
                <stx:assign name="seen" select="$seen + 1"/>
                <n><stx:value-of select="$seen"/>:<stx:value-of select="@v"/></n>
            </stx:template>
            <stx:template match="/*">
                <out><stx:process-children/></out>
            </stx:template>
        </stx:transform>
    "#;

    fn documents() -> Vec<String> {
        (0..16)
            .map(|i| format!("<rows><row v=\"a{i}\"/><row v=\"b{i}\"/></rows>"))
            .collect()
    }

    #[test]
    fn test_sync_executor_keeps_order() {
        let processor = Processor::compile(NUMBERED).unwrap();
        let outputs = transform_all(&SyncExecutor::new(), &processor, documents());
        assert_eq!(outputs.len(), 16);
        assert_eq!(
            outputs[3].as_ref().unwrap(),
            "<out><n>1:a3</n><n>2:b3</n></out>"
        );
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_parallel_runs_equal_sequential_runs() {
        let processor = Processor::compile(NUMBERED).unwrap();
        let sequential: Vec<String> = transform_all(&SyncExecutor::new(), &processor, documents())
            .into_iter()
            .map(Result::unwrap)
            .collect();
        let executor = ExecutorImpl::Rayon(RayonExecutor::with_threads(4).unwrap());
        let parallel: Vec<String> = transform_all(&executor, &processor, documents())
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_failures_are_per_document() {
        let processor = Processor::compile(NUMBERED).unwrap();
        let documents = vec!["<rows></row>", "<rows/>"];
        let outputs = transform_all(&ExecutorImpl::default(), &processor, documents);
        assert!(outputs[0].is_err());
        assert_eq!(outputs[1].as_ref().unwrap(), "<out/>");
    }
}
