use std::collections::HashMap;

use tokio::sync::RwLock;

use almox_core::domain::material::{Material, MaterialId};
use almox_core::domain::principal::{Principal, UserId};
use almox_core::domain::request::{
    MaterialRequest, RequestFilter, RequestId, RequestItemId, RequestLineItem, RequestStatus,
};

use super::{MaterialRepository, PrincipalDirectory, RepositoryError, RequestRepository};

#[derive(Default)]
pub struct InMemoryRequestRepository {
    requests: RwLock<HashMap<String, MaterialRequest>>,
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<MaterialRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn find_by_item_id(
        &self,
        item_id: &RequestItemId,
    ) -> Result<Option<MaterialRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.values().find(|request| request.item(item_id).is_some()).cloned())
    }

    async fn list(
        &self,
        filter: &RequestFilter,
    ) -> Result<(Vec<MaterialRequest>, u64), RepositoryError> {
        let requests = self.requests.read().await;
        let mut matches: Vec<&MaterialRequest> =
            requests.values().filter(|request| filter.matches(request)).collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0)));

        let total = matches.len() as u64;
        let offset = usize::try_from(filter.offset()).unwrap_or(usize::MAX);
        let page = matches
            .into_iter()
            .skip(offset)
            .take(filter.page_size() as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn insert(&self, request: MaterialRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn update(
        &self,
        request: MaterialRequest,
        expected: RequestStatus,
    ) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        match requests.get(&request.id.0) {
            Some(current) if current.status == expected => {
                requests.insert(request.id.0.clone(), request);
                Ok(())
            }
            _ => Err(RepositoryError::StaleState { id: request.id.0, expected }),
        }
    }

    async fn update_item_quantity(
        &self,
        request_id: &RequestId,
        item: &RequestLineItem,
        expected: RequestStatus,
    ) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        let stale = || RepositoryError::StaleState { id: request_id.0.clone(), expected };

        let request = requests
            .get_mut(&request_id.0)
            .filter(|request| request.status.allows_quantity_edits())
            .ok_or_else(stale)?;
        let stored = request.item_mut(&item.id).ok_or_else(stale)?;
        stored.fulfilled_quantity = item.fulfilled_quantity;
        stored.updated_at = item.updated_at;
        request.updated_at = item.updated_at;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMaterialRepository {
    materials: RwLock<HashMap<String, Material>>,
}

#[async_trait::async_trait]
impl MaterialRepository for InMemoryMaterialRepository {
    async fn find_by_id(&self, id: &MaterialId) -> Result<Option<Material>, RepositoryError> {
        let materials = self.materials.read().await;
        Ok(materials.get(&id.0).cloned())
    }

    async fn save(&self, material: Material) -> Result<(), RepositoryError> {
        let mut materials = self.materials.write().await;
        materials.insert(material.id.0.clone(), material);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPrincipalDirectory {
    principals: RwLock<HashMap<String, Principal>>,
}

#[async_trait::async_trait]
impl PrincipalDirectory for InMemoryPrincipalDirectory {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<Principal>, RepositoryError> {
        let principals = self.principals.read().await;
        Ok(principals.get(&id.0).cloned())
    }

    async fn save(&self, principal: Principal) -> Result<(), RepositoryError> {
        let mut principals = self.principals.write().await;
        principals.insert(principal.id.0.clone(), principal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use almox_core::domain::material::MaterialId;
    use almox_core::domain::principal::{Principal, Role, UserId};
    use almox_core::domain::request::{
        MaterialRequest, NewLineItem, RequestFilter, RequestStatus, UnitId,
    };

    use crate::repositories::{
        InMemoryPrincipalDirectory, InMemoryRequestRepository, PrincipalDirectory,
        RepositoryError, RequestRepository,
    };

    fn request(minutes_ago: i64) -> MaterialRequest {
        MaterialRequest::new(
            UserId("u-requester".to_string()),
            UnitId("unit-a".to_string()),
            None,
            vec![NewLineItem { material_id: MaterialId("7".to_string()), quantity: 3 }],
            Utc::now() - Duration::minutes(minutes_ago),
        )
        .expect("valid request")
    }

    #[tokio::test]
    async fn in_memory_request_repo_enforces_expected_status() {
        let repo = InMemoryRequestRepository::default();
        let request = request(0);
        repo.insert(request.clone()).await.expect("insert");

        let mut cancelled = request.clone();
        cancelled.status = RequestStatus::Cancelled;
        repo.update(cancelled.clone(), RequestStatus::Pending).await.expect("pending -> cancelled");

        let error = repo
            .update(cancelled, RequestStatus::Pending)
            .await
            .expect_err("status already moved on");
        assert!(matches!(error, RepositoryError::StaleState { .. }));

        let by_item = repo.find_by_item_id(&request.items[0].id).await.expect("find");
        assert_eq!(by_item.map(|found| found.status), Some(RequestStatus::Cancelled));
    }

    #[tokio::test]
    async fn in_memory_item_update_leaves_the_rest_of_the_request_alone() {
        let repo = InMemoryRequestRepository::default();
        let request = request(0);
        repo.insert(request.clone()).await.expect("insert");

        let mut item = request.items[0].clone();
        item.fulfilled_quantity = Some(2);
        repo.update_item_quantity(&request.id, &item, RequestStatus::Pending)
            .await
            .expect("pending lines are editable");

        let stored = repo.find_by_id(&request.id).await.expect("find").expect("present");
        assert_eq!(stored.items[0].fulfilled_quantity, Some(2));
        assert_eq!(stored.status, RequestStatus::Pending);

        let mut cancelled = stored.clone();
        cancelled.status = RequestStatus::Cancelled;
        repo.update(cancelled, RequestStatus::Pending).await.expect("cancel");

        item.fulfilled_quantity = Some(3);
        let error = repo
            .update_item_quantity(&request.id, &item, RequestStatus::Pending)
            .await
            .expect_err("cancelled requests are locked");
        assert!(matches!(error, RepositoryError::StaleState { .. }));
    }

    #[tokio::test]
    async fn in_memory_list_pages_newest_first() {
        let repo = InMemoryRequestRepository::default();
        let old = request(30);
        let new = request(5);
        repo.insert(old.clone()).await.expect("insert old");
        repo.insert(new.clone()).await.expect("insert new");

        let (page, total) = repo
            .list(&RequestFilter { page_size: 1, ..RequestFilter::default() })
            .await
            .expect("list");
        assert_eq!(total, 2);
        assert_eq!(page[0].id, new.id);

        let (second, _) = repo
            .list(&RequestFilter { page: 2, page_size: 1, ..RequestFilter::default() })
            .await
            .expect("list");
        assert_eq!(second[0].id, old.id);
    }

    #[tokio::test]
    async fn in_memory_principal_directory_round_trip() {
        let directory = InMemoryPrincipalDirectory::default();
        let principal = Principal {
            id: UserId("u-admin".to_string()),
            display_name: "Admin".to_string(),
            roles: vec![Role::Admin],
            active: true,
        };

        directory.save(principal.clone()).await.expect("save");
        assert_eq!(directory.find_by_id(&principal.id).await.expect("find"), Some(principal));
    }
}
