
use core::cell::UnsafeCell;

/// Cell for process-wide state touched only from the single foreground
/// thread.  Accesses are volatile so the optimizer cannot cache them.
#[repr(transparent)]
pub struct VCell<T>(UnsafeCell<T>);

// There is no pre-emption: the measurement code owns the CPU.
unsafe impl<T: Send> Sync for VCell<T> {}

impl<T> VCell<T> {
    #[inline(always)]
    pub const fn new(v: T) -> Self {Self(UnsafeCell::new(v))}

    #[inline(always)]
    pub fn read(&self) -> T where T: Copy {
        unsafe {core::ptr::read_volatile(self.as_ptr())}
    }

    #[inline(always)]
    pub fn write(&self, v: T) {
        unsafe {
            core::ptr::write_volatile(self.as_ptr(), v);
        }
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut T {
        self.0.get()
    }
}

impl<T> From<T> for VCell<T> {
    fn from(v: T) -> VCell<T> {VCell::new(v)}
}

#[test]
fn read_back() {
    let c = VCell::new(5u16);
    assert_eq!(c.read(), 5);
    c.write(980);
    assert_eq!(c.read(), 980);
    let d: VCell<Option<u8>> = None.into();
    assert_eq!(d.read(), None);
}
