#[allow(unused_imports)]
pub(crate) use self::inner::*;

#[cfg(loom)]
mod inner {
    #![allow(dead_code, unused_imports)]
    pub(crate) use loom::{cell, model, thread};

    pub(crate) mod sync {
        pub(crate) use loom::sync::*;
    }
}

#[cfg(not(loom))]
mod inner {
    #![allow(dead_code, unused_imports)]
    pub(crate) mod sync {
        #[cfg(test)]
        pub(crate) use std::sync::Arc;

        pub(crate) mod atomic {
            pub(crate) use portable_atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};
        }
    }


    #[cfg(test)]
    pub(crate) fn model(f: impl FnOnce()) {
        let _trace = crate::test_util::trace_init();
        tracing::info!("started test...");
        f();
        tracing::info!("test completed successfully!");
    }

    pub(crate) mod cell {
        #[derive(Debug)]
        pub(crate) struct UnsafeCell<T: ?Sized>(core::cell::UnsafeCell<T>);

        impl<T> UnsafeCell<T> {
            pub(crate) const fn new(data: T) -> UnsafeCell<T> {
                UnsafeCell(core::cell::UnsafeCell::new(data))
            }
        }

        impl<T: ?Sized> UnsafeCell<T> {
            #[inline(always)]
            pub(crate) fn with<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*const T) -> R,
            {
                f(self.0.get())
            }

            #[inline(always)]
            pub(crate) fn with_mut<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*mut T) -> R,
            {
                f(self.0.get())
            }
        }
    }
}
