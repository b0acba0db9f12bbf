//! Image resolution helpers for the Scaleway provider.

use std::future::Future;

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};

use crate::provider::LaunchSpec;

use super::super::{ScalewayProvider, ScalewayProviderError};

impl ScalewayProvider {
    /// Resolves the spec's image label to an image id, preferring images
    /// owned by the configured project over public ones.
    pub(in crate::scaleway) async fn resolve_image_id(
        &self,
        spec: &LaunchSpec,
    ) -> Result<String, ScalewayProviderError> {
        let zone = self.zone();
        let project = self.config.default_project_id.as_str();
        self.resolve_image_id_with(
            spec,
            || async move {
                let mut scoped = ScalewayListInstanceImagesBuilder::new(self.api.clone(), zone)
                    .public(true)
                    .project(project)
                    .name(&spec.image)
                    .arch(&spec.architecture);
                if let Some(org) = &self.config.default_organization_id {
                    scoped = scoped.organization(org);
                }
                scoped.run_async().await.map_err(ScalewayProviderError::from)
            },
            || async move {
                ScalewayListInstanceImagesBuilder::new(self.api.clone(), zone)
                    .public(true)
                    .name(&spec.image)
                    .arch(&spec.architecture)
                    .run_async()
                    .await
                    .map_err(ScalewayProviderError::from)
            },
        )
        .await
    }

    pub(in crate::scaleway) async fn resolve_image_id_with<FutA, FutB, FetchA, FetchB>(
        &self,
        spec: &LaunchSpec,
        project_fetch: FetchA,
        public_fetch: FetchB,
    ) -> Result<String, ScalewayProviderError>
    where
        FetchA: FnOnce() -> FutA,
        FetchB: FnOnce() -> FutB,
        FutA: Future<Output = Result<Vec<ScalewayImage>, ScalewayProviderError>>,
        FutB: Future<Output = Result<Vec<ScalewayImage>, ScalewayProviderError>>,
    {
        let project_images = Self::usable_images(project_fetch().await?, spec);
        let candidates = if project_images.is_empty() {
            Self::usable_images(public_fetch().await?, spec)
        } else {
            project_images
        };
        self.newest_image_id(candidates, spec)
    }

    pub(in crate::scaleway) fn newest_image_id(
        &self,
        candidates: Vec<ScalewayImage>,
        spec: &LaunchSpec,
    ) -> Result<String, ScalewayProviderError> {
        candidates
            .into_iter()
            .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
            .map(|image| image.id)
            .ok_or_else(|| ScalewayProviderError::ImageNotFound {
                label: spec.image.clone(),
                arch: spec.architecture.clone(),
                zone: self.zone().to_owned(),
            })
    }

    pub(in crate::scaleway) fn usable_images(
        images: Vec<ScalewayImage>,
        spec: &LaunchSpec,
    ) -> Vec<ScalewayImage> {
        images
            .into_iter()
            .filter(|image| image.arch == spec.architecture)
            .filter(|image| image.state == "available")
            .collect()
    }
}
