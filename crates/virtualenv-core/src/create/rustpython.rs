use super::cpython::exe_names;
use super::refs::Ref;
use super::{Builtin, CreatorKind, Layout};
use crate::discovery::PyInfo;

pub(super) struct RustPythonPosix;

impl Builtin for RustPythonPosix {
    fn kind(&self) -> CreatorKind {
        CreatorKind::RustPythonPosix
    }

    fn can_describe(&self, info: &PyInfo) -> bool {
        info.implementation == "RustPython" && !info.is_windows()
    }

    fn sources(&self, info: &PyInfo, layout: &Layout) -> Vec<Ref> {
        vec![Ref::exe(
            info.base_executable(),
            &layout.bin_dir,
            exe_names(info, &["rustpython"]),
        )]
    }
}
