//! Catalog lookup (Product → Category → 정책)
//!
//! 카탈로그 자체는 관리자 도구가 소유한다. 여기서는 읽기만 한다.

use crate::db::{CatalogStatus, Category, Product, Store};
use crate::error::ApiError;

/// 구매 가능한 상품과 그 카테고리
#[derive(Debug, Clone)]
pub struct ResolvedProduct {
    pub product: Product,
    pub category: Category,
}

/// 상품과 카테고리를 찾아 둘 다 Active 인지 확인
pub async fn resolve_product<S: Store>(store: &S, product_id: i64) -> Result<ResolvedProduct, ApiError> {
    let product = store
        .find_product(product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Product".to_string()))?;

    if product.status != CatalogStatus::Active {
        return Err(ApiError::ValidationError("product is not available".to_string()));
    }

    let category = store
        .find_category(product.category_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Category".to_string()))?;

    if category.status != CatalogStatus::Active {
        return Err(ApiError::ValidationError("product category is not available".to_string()));
    }

    Ok(ResolvedProduct { product, category })
}
