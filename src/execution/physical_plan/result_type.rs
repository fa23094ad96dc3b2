/// The OperatorResultType is used to indicate how data should flow around a regular (i.e. non-sink
/// and non-source) physical operator
///
/// There are three possible results:
/// - `NeedMoreInput` means the operator is done with the current input and can consume more input
/// if available. If there is more input the operator will be called with more input, otherwise
/// the operator will not be called again.
/// - `HaveMoreOutput` means the operator is not finished yet with the current input.
/// The operator will be called again with the same input.
/// - `Finished` means the operator has finished the entire pipeline and no more processing is
/// necessary. The operator will not be called again, and neither will any other operators in this
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorResultType {
    NeedMoreInput,
    HaveMoreOutput,
    Finished,
}

/// The SinkResultType is used to indicate the result of data flowing into a sink
/// There are two possible results:
/// - `NeedMoreInput` means the sink needs more input
/// - `Finished` means the sink is finished executing, and more input will not change the result any
/// further
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkResultType {
    NeedMoreInput,
    Finished,
}

/// The SinkFinalizeType is used to indicate the result of a Finalize call on a sink
/// There are two possible results:
/// - `Ready` means the sink is ready for further processing
/// - `NoOutputPossible` means the sink will never provide output, and any pipelines involving the
/// sink can be skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFinalizeType {
    Ready,
    NoOutputPossible,
}
