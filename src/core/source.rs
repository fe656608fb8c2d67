use memmap2::Mmap;

/// 被采样的原始数据（只读视图）
///
/// 引擎只通过这个 trait 读取数据，从不修改，也不假设独占访问。
pub trait SourceView: Send + Sync + 'static {
    fn bytes(&self) -> &[u8];

    fn len(&self) -> usize {
        self.bytes().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SourceView for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl SourceView for Box<[u8]> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl SourceView for &'static [u8] {
    fn bytes(&self) -> &[u8] {
        self
    }
}

// 内存映射文件
impl SourceView for Mmap {
    fn bytes(&self) -> &[u8] {
        self
    }
}
