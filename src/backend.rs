use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;

pub type Element = f32;

#[cfg(feature = "ndarray")]
pub type MainBackend = burn::backend::NdArray<Element, i32>;
#[cfg(all(
    any(feature = "tch-cpu", feature = "tch-gpu"),
    not(feature = "ndarray")
))]
pub type MainBackend = burn::backend::LibTorch<Element, i8>;
#[cfg(all(
    feature = "wgpu",
    not(any(feature = "ndarray", feature = "tch-cpu", feature = "tch-gpu"))
))]
pub type MainBackend = burn::backend::Wgpu<Element, i32>;
#[cfg(all(
    feature = "cuda",
    not(any(
        feature = "ndarray",
        feature = "tch-cpu",
        feature = "tch-gpu",
        feature = "wgpu"
    ))
))]
pub type MainBackend = burn::backend::Cuda<Element, i32>;

/// Parameters are stored at full precision regardless of the backend element type.
pub type RecorderTy = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Device selection for a backend.
///
/// The default device is the first accelerator the backend knows about, or the cpu.
pub trait MainDevice: Backend {
    fn main_device() -> <Self as Backend>::Device {
        Default::default()
    }
}

#[cfg(any(
    feature = "ndarray",
    feature = "tch-cpu",
    feature = "wgpu",
    feature = "cuda"
))]
#[cfg(not(all(feature = "tch-gpu", not(feature = "ndarray"))))]
impl MainDevice for MainBackend {}
#[cfg(all(feature = "tch-gpu", not(feature = "ndarray"), not(target_os = "macos")))]
impl MainDevice for MainBackend {
    fn main_device() -> <Self as Backend>::Device {
        burn::backend::libtorch::LibTorchDevice::Cuda(0)
    }
}
#[cfg(all(feature = "tch-gpu", not(feature = "ndarray"), target_os = "macos"))]
impl MainDevice for MainBackend {
    fn main_device() -> <Self as Backend>::Device {
        burn::backend::libtorch::LibTorchDevice::Mps
    }
}

pub type MainAutoBackend = burn::backend::Autodiff<MainBackend>;
impl MainDevice for MainAutoBackend {
    fn main_device() -> <Self as Backend>::Device {
        <<Self as AutodiffBackend>::InnerBackend as MainDevice>::main_device()
    }
}

#[cfg(not(feature = "_has-backend"))]
mod err {
    use super::*;
    std::compile_error!(
        "No backend selected. Enable one of the `ndarray`, `wgpu`, `tch-cpu`, `tch-gpu` or `cuda` features."
    );

    // pretend to fallback to ndarray (to avoid too many other unrelated errors)
    pub type MainBackend = burn::backend::NdArray<Element, i32>;
    impl MainDevice for MainBackend {}
}
#[cfg(not(feature = "_has-backend"))]
pub use err::*;
