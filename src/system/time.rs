use std::{
    fmt,
    mem::MaybeUninit,
    ops::{Add, AddAssign, Sub},
    time::Duration,
};

const NSEC_PER_SEC: i64 = 1_000_000_000;

/// A point in time or a time interval with nanosecond resolution, as carried by the
/// timing file and by the log server protocol.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSpec {
    secs: i64,
    nsecs: i64,
}

impl TimeSpec {
    pub const ZERO: TimeSpec = TimeSpec { secs: 0, nsecs: 0 };

    pub fn new(secs: i64, nsecs: i64) -> TimeSpec {
        TimeSpec {
            secs: secs + nsecs.div_euclid(NSEC_PER_SEC),
            nsecs: nsecs.rem_euclid(NSEC_PER_SEC),
        }
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn nsecs(&self) -> i64 {
        self.nsecs
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    fn clock(clock: libc::clockid_t) -> std::io::Result<TimeSpec> {
        let mut spec = MaybeUninit::<libc::timespec>::uninit();
        // SAFETY: valid pointer is passed to clock_gettime
        crate::cutils::cerr(unsafe { libc::clock_gettime(clock, spec.as_mut_ptr()) })?;
        // SAFETY: The `libc::clock_gettime` will correctly initialize `spec`,
        // otherwise it will return early with the `?` operator.
        let spec = unsafe { spec.assume_init() };
        Ok(spec.into())
    }

    /// Wall clock time.
    pub fn now() -> std::io::Result<TimeSpec> {
        Self::clock(libc::CLOCK_REALTIME)
    }

    /// A clock that is not affected by changes to the wall clock, for measuring delays.
    pub fn monotonic() -> std::io::Result<TimeSpec> {
        Self::clock(libc::CLOCK_MONOTONIC)
    }

    pub fn to_duration(self) -> Option<Duration> {
        let secs = u64::try_from(self.secs).ok()?;
        Some(Duration::new(secs, self.nsecs as u32))
    }

    #[inline]
    pub fn checked_add(self, rhs: TimeSpec) -> Option<TimeSpec> {
        let secs = self.secs.checked_add(rhs.secs)?;
        let nsecs = self.nsecs + rhs.nsecs;

        Some(TimeSpec::new(secs, nsecs))
    }

    #[inline]
    pub fn checked_sub(self, rhs: TimeSpec) -> Option<TimeSpec> {
        let secs = self.secs.checked_sub(rhs.secs)?;
        let nsecs = self.nsecs - rhs.nsecs;

        Some(TimeSpec::new(secs, nsecs))
    }

    /// The interval between `earlier` and `self`, clamped at zero.
    pub fn saturating_since(self, earlier: TimeSpec) -> TimeSpec {
        match self.checked_sub(earlier) {
            Some(delta) if delta.secs >= 0 => delta,
            _ => TimeSpec::ZERO,
        }
    }
}

impl Add for TimeSpec {
    type Output = TimeSpec;

    #[inline]
    fn add(self, rhs: TimeSpec) -> Self::Output {
        self.checked_add(rhs).unwrap_or(TimeSpec {
            secs: i64::MAX,
            nsecs: NSEC_PER_SEC - 1,
        })
    }
}

impl AddAssign for TimeSpec {
    fn add_assign(&mut self, rhs: TimeSpec) {
        *self = *self + rhs;
    }
}

impl Sub for TimeSpec {
    type Output = TimeSpec;

    #[inline]
    fn sub(self, rhs: TimeSpec) -> Self::Output {
        self.saturating_since(rhs)
    }
}

impl From<Duration> for TimeSpec {
    fn from(value: Duration) -> Self {
        TimeSpec::new(
            i64::try_from(value.as_secs()).unwrap_or(i64::MAX),
            value.subsec_nanos().into(),
        )
    }
}

impl From<libc::timespec> for TimeSpec {
    #[allow(clippy::useless_conversion)]
    fn from(value: libc::timespec) -> Self {
        TimeSpec::new(value.tv_sec.into(), value.tv_nsec.into())
    }
}

/// Render `secs` since the epoch with a `strftime(3)` format, in UTC or in the local time
/// zone. Returns `None` when the time cannot be represented.
pub fn format_time(secs: i64, format: &str, utc: bool) -> Option<String> {
    let format = std::ffi::CString::new(format).ok()?;
    let time = libc::time_t::try_from(secs).ok()?;
    let mut tm = MaybeUninit::<libc::tm>::uninit();
    // SAFETY: both pointers are valid for the duration of the call
    let result = unsafe {
        if utc {
            libc::gmtime_r(&time, tm.as_mut_ptr())
        } else {
            libc::localtime_r(&time, tm.as_mut_ptr())
        }
    };
    if result.is_null() {
        return None;
    }
    // SAFETY: gmtime_r/localtime_r succeeded, so `tm` was initialized
    let tm = unsafe { tm.assume_init() };

    let mut buf = [0u8; 1024];
    // SAFETY: strftime writes at most `buf.len()` bytes, including the terminating NUL
    let len = unsafe {
        libc::strftime(
            buf.as_mut_ptr().cast(),
            buf.len(),
            format.as_ptr(),
            &tm,
        )
    };
    if len == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&buf[..len]).into_owned())
}

/// Formats as `seconds.nanoseconds` with nine fractional digits.
impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nsecs)
    }
}
