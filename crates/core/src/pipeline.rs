//! 类型化的流水线定义
//!
//! 流水线由若干阶段组成，第0阶段没有输入，之后每个阶段的输入类型等于前一阶段的输出类型。
//! 类型关系在构建时由编译器检查，运行时各阶段的数据以自描述的 JSON 值传输，
//! 因此不同类型的阶段可以自由串联。
//!
//! ```
//! use pipeline_core::Pipeline;
//!
//! let pipeline = Pipeline::source(|| 1_u64)
//!     .then(|n: u64| n * 2)
//!     .then(|n: u64| format!("value={n}"))
//!     .build();
//! assert_eq!(pipeline.len(), 3);
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{PipelineError, PipelineResult};

/// 类型擦除后的单个阶段
pub trait DynStage: Send + Sync {
    /// 执行阶段函数。第0阶段的输入为 `None`
    fn call(&self, input: Option<Value>) -> PipelineResult<Value>;
}

struct SourceStage<F> {
    func: F,
}

impl<T, F> DynStage for SourceStage<F>
where
    T: Serialize,
    F: Fn() -> T + Send + Sync,
{
    fn call(&self, _input: Option<Value>) -> PipelineResult<Value> {
        Ok(serde_json::to_value((self.func)())?)
    }
}

struct MapStage<I, F> {
    func: F,
    _input: PhantomData<fn(I)>,
}

impl<I, O, F> DynStage for MapStage<I, F>
where
    I: DeserializeOwned,
    O: Serialize,
    F: Fn(I) -> O + Send + Sync,
{
    fn call(&self, input: Option<Value>) -> PipelineResult<Value> {
        let raw = input.ok_or_else(|| {
            PipelineError::StageExecution("非首个阶段缺少输入".to_string())
        })?;
        let typed: I = serde_json::from_value(raw)
            .map_err(|e| PipelineError::StageExecution(format!("阶段输入类型不匹配: {e}")))?;
        Ok(serde_json::to_value((self.func)(typed))?)
    }
}

/// 一条完整的流水线
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn DynStage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl Pipeline {
    /// 从第0阶段（数据源）开始构建
    pub fn source<T, F>(func: F) -> PipelineBuilder<T>
    where
        T: Serialize + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        PipelineBuilder {
            stages: vec![Arc::new(SourceStage { func })],
            _output: PhantomData,
        }
    }

    /// 追加一个自定义的类型擦除阶段
    pub fn push_stage(&mut self, stage: Arc<dyn DynStage>) {
        self.stages.push(stage);
    }

    pub fn stage(&self, position: usize) -> PipelineResult<Arc<dyn DynStage>> {
        self.stages
            .get(position)
            .cloned()
            .ok_or(PipelineError::StageNotFound { position })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn max_position(&self) -> Option<usize> {
        self.stages.len().checked_sub(1)
    }
}

/// 类型化构建器，`T` 为当前最后一个阶段的输出类型
pub struct PipelineBuilder<T> {
    stages: Vec<Arc<dyn DynStage>>,
    _output: PhantomData<fn() -> T>,
}

impl<T> PipelineBuilder<T>
where
    T: DeserializeOwned + 'static,
{
    pub fn then<U, F>(mut self, func: F) -> PipelineBuilder<U>
    where
        U: Serialize + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.stages.push(Arc::new(MapStage {
            func,
            _input: PhantomData::<fn(T)>,
        }));
        PipelineBuilder {
            stages: self.stages,
            _output: PhantomData,
        }
    }
}

impl<T> PipelineBuilder<T> {
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Batch {
        items: Vec<u32>,
    }

    #[test]
    fn test_heterogeneous_chain() {
        let pipeline = Pipeline::source(|| Batch { items: vec![1, 2, 3] })
            .then(|b: Batch| b.items.iter().sum::<u32>())
            .then(|sum: u32| format!("sum={sum}"))
            .build();

        let first = pipeline.stage(0).unwrap().call(None).unwrap();
        let second = pipeline.stage(1).unwrap().call(Some(first)).unwrap();
        let third = pipeline.stage(2).unwrap().call(Some(second)).unwrap();
        assert_eq!(third, Value::String("sum=6".to_string()));
        assert_eq!(pipeline.max_position(), Some(2));
    }

    #[test]
    fn test_missing_input_is_error() {
        let pipeline = Pipeline::source(|| 1_i32).then(|x: i32| x + 1).build();
        let err = pipeline.stage(1).unwrap().call(None).unwrap_err();
        assert!(matches!(err, PipelineError::StageExecution(_)));
    }

    #[test]
    fn test_mismatched_input_is_error() {
        let pipeline = Pipeline::source(|| 1_i32).then(|x: i32| x + 1).build();
        let err = pipeline
            .stage(1)
            .unwrap()
            .call(Some(Value::String("nope".to_string())))
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageExecution(_)));
    }

    #[test]
    fn test_unknown_stage_position() {
        let pipeline = Pipeline::source(|| 0_u8).build();
        assert!(matches!(
            pipeline.stage(5),
            Err(PipelineError::StageNotFound { position: 5 })
        ));
    }

    struct Echo;

    impl DynStage for Echo {
        fn call(&self, input: Option<Value>) -> PipelineResult<Value> {
            Ok(input.unwrap_or(Value::Null))
        }
    }

    #[test]
    fn test_push_custom_stage() {
        let mut pipeline = Pipeline::source(|| 5_u8).build();
        pipeline.push_stage(Arc::new(Echo));
        let out = pipeline
            .stage(1)
            .unwrap()
            .call(Some(Value::from(5)))
            .unwrap();
        assert_eq!(out, Value::from(5));
    }
}
