/// A kernel stack backing a process while it is in the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelStack(pub u64);

/// A user address space (page table root).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpace(pub u64);

/// An open file reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u64);

/// A reference to a directory inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inode(pub u64);

/// Memory, file and directory services used by process creation and teardown.
///
/// The stack and address space methods may be called with the process table
/// lock held and must not try to take it. File and directory methods are
/// always called without it.
pub trait Resources: Send + Sync {
    fn alloc_kernel_stack(&self) -> Option<KernelStack>;
    fn free_kernel_stack(&self, stack: KernelStack);

    /// Fresh address space holding the first user program.
    fn create_address_space(&self) -> Option<AddressSpace>;
    fn copy_address_space(&self, from: AddressSpace) -> Option<AddressSpace>;
    fn free_address_space(&self, space: AddressSpace);

    fn dup_file(&self, file: FileHandle) -> FileHandle;
    fn close_file(&self, file: FileHandle);

    fn root_dir(&self) -> Inode;
    fn dup_dir(&self, dir: Inode) -> Inode;
    fn put_dir(&self, dir: Inode);
}
