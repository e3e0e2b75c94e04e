//! Batch message dispatch: recipient normalization, template rendering, and
//! the pipeline that turns a template plus recipient rows into validated,
//! rate-limited, individually logged delivery attempts.

pub mod normalize;
pub mod pipeline;
pub mod rows;
pub mod template;

pub use normalize::{normalize_recipient, DEFAULT_COUNTRY_CODE};
pub use pipeline::{
    BatchDispatchReport, BatchRequest, DeliveryAttemptResult, DeliveryFailure, DispatchConfig,
    DispatchError, DispatchPipeline, FailureReason,
};
pub use rows::{pick_display_name, pick_phone_field, RowRecord};
pub use template::render_template;
