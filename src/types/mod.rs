//! Common Types Module
//!
//! 애플리케이션 전반에서 사용되는 공통 타입 정의
//!
//! 금액은 모두 minor unit(1/100) 정수로 다룬다. 부동소수점 누적 오차 없이
//! 기존 기록과 같은 round-half-up(소수 둘째 자리) 규칙을 유지하기 위함.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 금액 타입 (minor unit, 1/100)
///
/// DB에는 BIGINT로 저장된다.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// minor unit(1/100) 값으로 생성
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// 정수 통화 단위로 생성 (예: Rp 100.000 → `from_major(100_000)`)
    pub const fn from_major(major: i64) -> Self {
        Self(major * 100)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    /// 정수 통화 단위 (소수점 이하 버림). 게이트웨이 요청 금액에 사용.
    pub const fn whole_units(self) -> i64 {
        self.0 / 100
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// `percent`% 금액, round-half-up
    pub fn percent(self, percent: u32) -> Money {
        let scaled = self.0 as i128 * percent as i128;
        let rounded = if scaled >= 0 {
            (scaled + 50) / 100
        } else {
            (scaled - 50) / 100
        };
        Money(rounded as i64)
    }

    /// 기간 수만큼 곱한 금액 (예: daily profit × duration)
    pub fn times(self, periods: i32) -> Money {
        Money(self.0 * periods as i64)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// 주문 번호 종류별 prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Investment,
    Return,
    Team,
    Withdraw,
}

impl OrderKind {
    fn prefix(self) -> &'static str {
        match self {
            OrderKind::Investment => "INV",
            OrderKind::Return => "RET",
            OrderKind::Team => "TEAM",
            OrderKind::Withdraw => "WD",
        }
    }
}

/// 프로세스 내 순번. 같은 초에 같은 사용자에게 여러 entry 가 생겨도 겹치지 않게 한다.
static ORDER_SEQ: AtomicU32 = AtomicU32::new(0);

/// 주문 번호 생성
///
/// 형식: `{PREFIX}{yyyymmddHHMMSS}{user_id}{2자리 난수}{4자리 순번}`
/// 유일성은 DB unique 제약이 최종 보장한다.
pub fn new_order_id(kind: OrderKind, user_id: i64) -> String {
    let salt: u8 = rand::thread_rng().gen_range(0..100);
    let seq = ORDER_SEQ.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!(
        "{}{}{}{:02}{:04}",
        kind.prefix(),
        Utc::now().format("%Y%m%d%H%M%S"),
        user_id,
        salt,
        seq
    )
}
