/// Element types whose slices can back a receive buffer that is later reinterpreted as `f32`s.
///
/// Anything at least 4 bytes aligned keeps a tensor payload that starts right after the
/// 4 byte kind header properly aligned.
pub trait Align4: bytemuck::Pod {}

impl Align4 for u32 {}
impl Align4 for i32 {}
impl Align4 for u64 {}
impl Align4 for i64 {}
impl Align4 for f32 {}
impl Align4 for f64 {}
